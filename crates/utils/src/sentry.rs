use std::sync::{Arc, OnceLock};

use sentry::{Hub, SentryFutureExt};
use sentry_tracing::{EventFilter, SentryLayer};
use tracing::Level;

static INIT_GUARD: OnceLock<sentry::ClientInitGuard> = OnceLock::new();

#[derive(Clone, Copy, Debug)]
pub enum SentrySource {
    Accounts,
}

impl SentrySource {
    fn tag(self) -> &'static str {
        match self {
            SentrySource::Accounts => "accounts",
        }
    }
}

fn environment() -> &'static str {
    if cfg!(debug_assertions) {
        "dev"
    } else {
        "production"
    }
}

/// Initialise the Sentry client once. Without a DSN nothing is reported.
pub fn init_once(source: SentrySource, dsn: Option<&str>) {
    let Some(dsn) = dsn.filter(|value| !value.trim().is_empty()) else {
        return;
    };

    INIT_GUARD.get_or_init(|| {
        sentry::init((
            dsn,
            sentry::ClientOptions {
                release: sentry::release_name!(),
                environment: Some(environment().into()),
                ..Default::default()
            },
        ))
    });

    sentry::configure_scope(|scope| {
        scope.set_tag("source", source.tag());
    });
}

/// Runs `future` on its own hub, forked from the current one, with `user` on the scope.
///
/// Worker threads are shared between requests, so the user is never written to the
/// thread's hub.
pub async fn with_user_scope<F>(user_id: &str, email: Option<&str>, future: F) -> F::Output
where
    F: Future,
{
    let mut sentry_user = sentry::User {
        id: Some(user_id.to_string()),
        ..Default::default()
    };

    if let Some(email) = email {
        sentry_user.email = Some(email.to_string());
    }

    let hub = Arc::new(Hub::new_from_top(Hub::current()));
    hub.configure_scope(|scope| {
        scope.set_user(Some(sentry_user));
    });

    future.bind_hub(hub).await
}

pub fn sentry_layer<S>() -> SentryLayer<S>
where
    S: tracing::Subscriber,
    S: for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    SentryLayer::default()
        .span_filter(|meta| {
            matches!(
                *meta.level(),
                Level::DEBUG | Level::INFO | Level::WARN | Level::ERROR
            )
        })
        .event_filter(|meta| match *meta.level() {
            Level::ERROR => EventFilter::Event,
            Level::DEBUG | Level::INFO | Level::WARN => EventFilter::Breadcrumb,
            Level::TRACE => EventFilter::Ignore,
        })
}
