//! Per-owner session context.

use std::fmt;

use zkutxo_common::{Address, NullifierDeriver, OwnerKeyMaterial, UtxoError};

/// Everything that identifies one owner to the engine: their address and the
/// secret their nullifiers are bound to. Built by the caller and passed to
/// each operation; nothing about a session is global.
#[derive(Clone)]
pub struct OwnerSession {
    owner: Address,
    deriver: NullifierDeriver,
}

impl OwnerSession {
    pub fn new(owner: Address, material: OwnerKeyMaterial) -> Result<Self, UtxoError> {
        if owner.is_zero() {
            return Err(UtxoError::InvalidInput("session owner is the zero address".into()));
        }
        Ok(Self {
            owner,
            deriver: NullifierDeriver::new(Some(material)),
        })
    }

    /// A session that can read and reconcile but not derive nullifiers.
    pub fn read_only(owner: Address) -> Self {
        Self {
            owner,
            deriver: NullifierDeriver::new(None),
        }
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn deriver(&self) -> &NullifierDeriver {
        &self.deriver
    }
}

impl fmt::Debug for OwnerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerSession")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}
