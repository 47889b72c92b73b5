use std::fmt;

use alloy::primitives::{Address, address};
use serde::{Deserialize, Serialize};

/// Issuer registry deployment on Polygon Amoy.
pub const AMOY_ISSUER_REGISTRY: Address = address!("0xf4ab183CabCD54F1d2632FD4DF6688bbd04595d5");
/// Revocation registry deployment on Polygon Amoy.
pub const AMOY_REVOCATION_REGISTRY: Address =
    address!("0xA5274b769D818785BdEDAB209ED23ef2125f58dF");

/// One of the two on-chain registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registry {
    Issuer,
    Revocation,
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Issuer => f.write_str("IssuerRegistry"),
            Self::Revocation => f.write_str("RevocationRegistry"),
        }
    }
}

/// Deployed addresses of both registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryAddresses {
    pub issuer_registry: Address,
    pub revocation_registry: Address,
}

impl RegistryAddresses {
    pub fn new(issuer_registry: Address, revocation_registry: Address) -> Self {
        Self {
            issuer_registry,
            revocation_registry,
        }
    }

    pub fn get(&self, registry: Registry) -> Address {
        match registry {
            Registry::Issuer => self.issuer_registry,
            Registry::Revocation => self.revocation_registry,
        }
    }

    /// Maps a log emitter back to the registry it belongs to.
    pub fn registry_of(&self, emitter: Address) -> Option<Registry> {
        if emitter == self.issuer_registry {
            Some(Registry::Issuer)
        } else if emitter == self.revocation_registry {
            Some(Registry::Revocation)
        } else {
            None
        }
    }
}

impl Default for RegistryAddresses {
    fn default() -> Self {
        Self::new(AMOY_ISSUER_REGISTRY, AMOY_REVOCATION_REGISTRY)
    }
}

/// Owner and pause state of both registries, read in one go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStatus {
    pub issuer_owner: Address,
    pub issuer_paused: bool,
    pub revocation_owner: Address,
    pub revocation_paused: bool,
    /// The issuer registry the revocation registry consults for trust.
    pub linked_issuer_registry: Address,
}

impl RegistryStatus {
    pub fn owner(&self, registry: Registry) -> Address {
        match registry {
            Registry::Issuer => self.issuer_owner,
            Registry::Revocation => self.revocation_owner,
        }
    }

    pub fn paused(&self, registry: Registry) -> bool {
        match registry {
            Registry::Issuer => self.issuer_paused,
            Registry::Revocation => self.revocation_paused,
        }
    }

    /// Whether the revocation registry consults the given issuer registry.
    pub fn is_linked(&self, addresses: &RegistryAddresses) -> bool {
        self.linked_issuer_registry == addresses.issuer_registry
    }
}
