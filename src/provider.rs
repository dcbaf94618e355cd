//! Provider abstraction
//!
//! A provider realizes VirtualMachines on one kind of infrastructure (a
//! cloud API, a hypervisor). It contributes the CRDs it owns and the
//! controller futures that reconcile them; [`crate::controller`] installs
//! the former and drives the latter.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::controller::Action;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;

use crate::Error;

/// A running controller, typically `Controller::new(..).run(..).for_each(..)`
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Watcher timeout (seconds) - must be less than the client read timeout
/// so the API server closes idle watches before the client gives up.
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// Requeue delay after a retryable reconcile error
pub const RETRYABLE_ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Requeue delay after an error that needs outside intervention
pub const PERMANENT_ERROR_REQUEUE: Duration = Duration::from_secs(300);

/// An infrastructure provider for VirtualMachines
pub trait Provider: Send + Sync {
    /// Short name identifying the provider type, e.g. "aws" or
    /// "digitalocean" (not a particular account or instance).
    ///
    /// Also used as the field manager for objects the controller applies.
    fn name(&self) -> &str;

    /// CRDs owned by this provider, installed before controllers start
    fn crds(&self) -> Vec<CustomResourceDefinition> {
        Vec::new()
    }

    /// Build the controller futures for this provider
    fn controllers(&self, client: Client, namespace: &str) -> Vec<ControllerFuture>;
}

/// Watcher configuration shared by provider controllers
pub fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Error policy for `Controller::run`.
///
/// Retryable errors requeue quickly; the rest wait for a human to fix the
/// object and rely on the watch to trigger earlier.
pub fn error_policy<K, C>(_obj: Arc<K>, error: &Error, _ctx: Arc<C>) -> Action {
    requeue_for(error)
}

/// Requeue action for a reconcile error
pub fn requeue_for(error: &Error) -> Action {
    if error.is_retryable() {
        tracing::warn!(error = %error, "Reconcile failed, retrying");
        Action::requeue(RETRYABLE_ERROR_REQUEUE)
    } else {
        tracing::error!(error = %error, "Reconcile failed, needs intervention");
        Action::requeue(PERMANENT_ERROR_REQUEUE)
    }
}

/// Creates a closure for logging reconciliation results.
///
/// Use with `Controller::run(..).for_each(log_reconcile_result("Instance"))`.
pub fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_requeue_quickly() {
        let action = requeue_for(&Error::internal("api timeout"));
        assert_eq!(action, Action::requeue(RETRYABLE_ERROR_REQUEUE));
    }

    #[test]
    fn permanent_errors_requeue_slowly() {
        let action = requeue_for(&Error::corrupt_ledger_entry("provision", "bad json"));
        assert_eq!(action, Action::requeue(PERMANENT_ERROR_REQUEUE));
    }

    #[test]
    fn error_policy_ignores_object_and_context() {
        let action = error_policy(Arc::new(()), &Error::validation("bad"), Arc::new(()));
        assert_eq!(action, Action::requeue(PERMANENT_ERROR_REQUEUE));
    }

    #[tokio::test]
    async fn log_reconcile_result_handles_both_outcomes() {
        let log = log_reconcile_result::<Action, String>("Test");
        log(Ok(Action::await_change())).await;
        log(Err("boom".to_string())).await;
    }
}
