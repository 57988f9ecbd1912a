//! Presence tracking with case-insensitive names.

/// An ordered list of present users. Names compare case-insensitively;
/// the case of the first insertion is the one kept.
#[derive(Debug, Clone, Default)]
pub struct BuddyList {
    users: Vec<String>,
}

impl BuddyList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user. `false` if an equivalent name is already present.
    pub fn add(&mut self, name: &str) -> bool {
        if self.contains(name) {
            return false;
        }
        self.users.push(name.to_owned());
        true
    }

    /// Remove a user. `false` if no equivalent name was present.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.users.len();
        self.users.retain(|u| !u.eq_ignore_ascii_case(name));
        self.users.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.users.iter().any(|u| u.eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.users.iter().map(String::as_str)
    }
}
