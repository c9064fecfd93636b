//! Fixed precision policy for on-disk tensor storage.

/// Element type written to the flat buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetDtype {
    /// 32-bit IEEE float
    F32,
    /// 8-bit signed integer
    I8,
}

impl TargetDtype {
    /// Size of one element in bytes
    pub fn size_in_bytes(&self) -> usize {
        match self {
            TargetDtype::F32 => 4,
            TargetDtype::I8 => 1,
        }
    }
}

/// Role a tensor plays in the model.
///
/// The per-layer variants are declared in emission order, which is also
/// the field order of a block descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorRole {
    TokenEmbedding,
    OutputProjection,
    AttnNormWeight,
    AttnNormBias,
    QProj,
    KProj,
    VProj,
    OProj,
    FfnNormWeight,
    FfnNormBias,
    FfnUpProj,
    FfnDownProj,
}

impl TensorRole {
    /// Per-layer roles in emission order
    pub const LAYER_ROLES: [TensorRole; 10] = [
        TensorRole::AttnNormWeight,
        TensorRole::AttnNormBias,
        TensorRole::QProj,
        TensorRole::KProj,
        TensorRole::VProj,
        TensorRole::OProj,
        TensorRole::FfnNormWeight,
        TensorRole::FfnNormBias,
        TensorRole::FfnUpProj,
        TensorRole::FfnDownProj,
    ];

    /// Whether the tensor belongs to a transformer layer
    pub fn is_layer_role(&self) -> bool {
        !matches!(self, TensorRole::TokenEmbedding | TensorRole::OutputProjection)
    }

    /// Position of this role inside a block descriptor
    pub fn descriptor_index(&self) -> Option<usize> {
        Self::LAYER_ROLES.iter().position(|r| r == self)
    }

    /// Whether the tensor is a norm weight or bias vector
    pub fn is_norm(&self) -> bool {
        matches!(
            self,
            TensorRole::AttnNormWeight
                | TensorRole::AttnNormBias
                | TensorRole::FfnNormWeight
                | TensorRole::FfnNormBias
        )
    }
}

/// Assignment of on-disk element type per tensor role.
///
/// The policy is fixed: the consuming engine reads embeddings and norms as
/// f32 and every projection matrix as i8.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrecisionPolicy;

impl PrecisionPolicy {
    /// Target dtype for a tensor role
    pub fn target_for(&self, role: TensorRole) -> TargetDtype {
        match role {
            TensorRole::TokenEmbedding
            | TensorRole::AttnNormWeight
            | TensorRole::AttnNormBias
            | TensorRole::FfnNormWeight
            | TensorRole::FfnNormBias => TargetDtype::F32,
            TensorRole::OutputProjection
            | TensorRole::QProj
            | TensorRole::KProj
            | TensorRole::VProj
            | TensorRole::OProj
            | TensorRole::FfnUpProj
            | TensorRole::FfnDownProj => TargetDtype::I8,
        }
    }
}
