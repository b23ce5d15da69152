use std::sync::Arc;

use super::provider::VerifiedIdentity;
use crate::db::{
    identity_errors::IdentityError,
    users::{User, UserStore},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Existing(User),
    NotFound,
}

/// Maps a verified external identity onto an account in the user store.
///
/// A successful verification says nothing about registration; callers branch on
/// [`Resolution::NotFound`] instead of treating it as a failure.
#[derive(Clone)]
pub struct IdentityResolver {
    store: Arc<dyn UserStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn UserStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, identity: &VerifiedIdentity) -> Result<Resolution, IdentityError> {
        self.resolve_email(&identity.subject_email).await
    }

    pub async fn resolve_email(&self, email: &str) -> Result<Resolution, IdentityError> {
        Ok(match self.store.find_by_email(email).await? {
            Some(user) => Resolution::Existing(user),
            None => Resolution::NotFound,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::provider::ProviderKind, db::users::InMemoryUserStore};

    #[tokio::test]
    async fn registered_email_resolves_to_user() {
        let user = User::new("a@x.com", vec!["user".into()]);
        let resolver =
            IdentityResolver::new(Arc::new(InMemoryUserStore::with_users([user.clone()])));

        let identity =
            VerifiedIdentity::new(ProviderKind::Apple, Some("A@x.com".into()), None).unwrap();
        assert_eq!(
            resolver.resolve(&identity).await.unwrap(),
            Resolution::Existing(user)
        );
    }

    #[tokio::test]
    async fn unknown_email_is_not_found_rather_than_an_error() {
        let resolver = IdentityResolver::new(Arc::new(InMemoryUserStore::new()));
        let identity =
            VerifiedIdentity::new(ProviderKind::Kakao, Some("new@x.com".into()), None).unwrap();

        assert_eq!(
            resolver.resolve(&identity).await.unwrap(),
            Resolution::NotFound
        );
    }
}
