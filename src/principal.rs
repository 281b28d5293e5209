use serde::{Deserialize, Serialize};

/// The security principal of a request, as resolved by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct UserPrincipal {
    /// The user id, unique within `domain`.
    pub id: String,
    /// The domain the user belongs to.
    pub domain: String,
    /// The printable name of the user.
    pub name: String,
    /// The name of the user provider that resolved this principal.
    pub provider: String,
    /// The roles granted to the user.
    pub roles: Vec<String>,
}

impl UserPrincipal {
    /// Returns true if the user was granted `role`.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|granted| granted == role)
    }
}
