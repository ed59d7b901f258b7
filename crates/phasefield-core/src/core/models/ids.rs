use slotmap::{Key, KeyData, new_key_type};

new_key_type! {
    pub struct FieldId;
}

/// Plain integer form of a [`FieldId`], used in checkpoints and for
/// provenance links that must not keep a field alive.
pub type RawFieldId = u64;

impl FieldId {
    pub fn to_raw(self) -> RawFieldId {
        self.data().as_ffi()
    }

    pub fn from_raw(raw: RawFieldId) -> Self {
        KeyData::from_ffi(raw).into()
    }
}
