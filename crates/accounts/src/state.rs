use std::sync::Arc;

use crate::{
    auth::{IdentityResolver, JwtService, ProviderRegistry, SignInService},
    db::users::UserStore,
};

#[derive(Clone)]
pub struct AppState {
    jwt: Arc<JwtService>,
    resolver: IdentityResolver,
    sign_in: Arc<SignInService>,
}

impl AppState {
    pub fn new(store: Arc<dyn UserStore>, providers: ProviderRegistry, jwt: JwtService) -> Self {
        let jwt = Arc::new(jwt);
        let resolver = IdentityResolver::new(store);
        let sign_in = Arc::new(SignInService::new(
            Arc::new(providers),
            resolver.clone(),
            Arc::clone(&jwt),
        ));

        Self {
            jwt,
            resolver,
            sign_in,
        }
    }

    pub fn jwt(&self) -> Arc<JwtService> {
        Arc::clone(&self.jwt)
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    pub fn sign_in(&self) -> Arc<SignInService> {
        Arc::clone(&self.sign_in)
    }
}
