//! Lifecycle hooks around verify and settle.
//!
//! Six event kinds are fired by [`FacilitatorCore`](crate::FacilitatorCore):
//!
//! | Event | Fired | Outcome |
//! |-------|-------|---------|
//! | [`BeforeVerify`] | before scheme validation | `()` |
//! | [`AfterVerify`] | after a valid verification | `()` |
//! | [`VerifyFailure`] | after an invalid verification | `()` |
//! | [`BeforeSettle`] | before execution | [`SettleDecision`] |
//! | [`AfterSettle`] | after a successful settlement | `()` |
//! | [`SettleFailure`] | after a failed settlement | `()` |
//!
//! Hooks of one kind run sequentially, in registration order, and are awaited before
//! the phase result is returned. Only [`BeforeSettle`] can change the outcome: the
//! first hook answering [`SettleDecision::Abort`] stops the settlement and the remaining
//! before-settle hooks are skipped. A hook returning [`HookError`] is logged and
//! otherwise ignored.

use std::fmt;
use std::sync::Arc;
use x402_types::chain::ChainId;
use x402_types::proto::v2::{PaymentPayload, PaymentRequirements};

/// The payment a lifecycle event is about.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentContext {
    pub payload: PaymentPayload,
    pub requirements: PaymentRequirements,
    /// Identity of the signed authorization, as reported by the payment's scheme.
    pub payment_id: Option<String>,
}

impl PaymentContext {
    pub fn new(payload: PaymentPayload, requirements: PaymentRequirements) -> Self {
        Self {
            payload,
            requirements,
            payment_id: None,
        }
    }

    pub fn with_payment_id(mut self, payment_id: Option<String>) -> Self {
        self.payment_id = payment_id;
        self
    }

    pub fn network(&self) -> &ChainId {
        &self.requirements.network
    }

    pub fn scheme(&self) -> &str {
        &self.requirements.scheme
    }
}

/// A lifecycle event kind.
pub trait LifecycleEvent: fmt::Debug + Send + Sync + 'static {
    /// What a hook answers for this event.
    type Outcome: Send;

    /// Event name used in logs.
    const NAME: &'static str;

    fn context(&self) -> &PaymentContext;
}

macro_rules! lifecycle_event {
    ($(#[$meta:meta])* $name:ident, $label:literal, $outcome:ty { $($field:ident : $ty:ty),* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            pub context: Arc<PaymentContext>,
            $(pub $field: $ty,)*
        }

        impl LifecycleEvent for $name {
            type Outcome = $outcome;
            const NAME: &'static str = $label;

            fn context(&self) -> &PaymentContext {
                &self.context
            }
        }
    };
}

lifecycle_event!(BeforeVerify, "before_verify", () {});
lifecycle_event!(AfterVerify, "after_verify", () { payer: String });
lifecycle_event!(
    /// `reason` is the wire error reason code.
    VerifyFailure, "verify_failure", () { reason: String }
);
lifecycle_event!(BeforeSettle, "before_settle", SettleDecision {});
lifecycle_event!(AfterSettle, "after_settle", () { payer: String, transaction: String });
lifecycle_event!(
    /// Not fired for settlements aborted by a [`BeforeSettle`] hook.
    SettleFailure, "settle_failure", () { reason: String }
);

/// Answer of a [`BeforeSettle`] hook.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SettleDecision {
    #[default]
    Continue,
    Abort { reason: String },
}

impl SettleDecision {
    pub fn abort<S: Into<String>>(reason: S) -> Self {
        SettleDecision::Abort {
            reason: reason.into(),
        }
    }
}

/// Unexpected failure inside a hook.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HookError(String);

impl HookError {
    pub fn new<S: fmt::Display>(message: S) -> Self {
        Self(message.to_string())
    }
}

/// An observer of one lifecycle event kind.
#[async_trait::async_trait]
pub trait Hook<E: LifecycleEvent>: Send + Sync {
    async fn call(&self, event: &E) -> Result<E::Outcome, HookError>;
}

#[async_trait::async_trait]
impl<E: LifecycleEvent, H: Hook<E> + ?Sized> Hook<E> for Arc<H> {
    async fn call(&self, event: &E) -> Result<E::Outcome, HookError> {
        self.as_ref().call(event).await
    }
}

/// Adapts an async closure into a [`Hook`]. The closure receives a clone of the event.
///
/// ```
/// use x402_facilitator_local::hooks::{BeforeSettle, FnHook, HookError, LifecycleHooks, SettleDecision};
///
/// let mut hooks = LifecycleHooks::new();
/// hooks.on_before_settle(FnHook::new(|event: BeforeSettle| async move {
///     if event.context.requirements.amount == "0" {
///         return Ok(SettleDecision::abort("Zero-amount payments are not settled"));
///     }
///     Ok::<_, HookError>(SettleDecision::Continue)
/// }));
/// ```
pub struct FnHook<F>(F);

impl<F> FnHook<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait::async_trait]
impl<E, F, Fut> Hook<E> for FnHook<F>
where
    E: LifecycleEvent + Clone,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = Result<E::Outcome, HookError>> + Send,
{
    async fn call(&self, event: &E) -> Result<E::Outcome, HookError> {
        (self.0)(event.clone()).await
    }
}

/// Ordered hooks of one event kind.
pub struct HookList<E: LifecycleEvent>(Vec<Arc<dyn Hook<E>>>);

impl<E: LifecycleEvent> Default for HookList<E> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<E: LifecycleEvent> fmt::Debug for HookList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookList<{}>({})", E::NAME, self.0.len())
    }
}

impl<E: LifecycleEvent> HookList<E> {
    pub fn push<H: Hook<E> + 'static>(&mut self, hook: H) {
        self.0.push(Arc::new(hook));
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn log_failure(event: &E, index: usize, error: &HookError) {
        tracing::warn!(
            event = E::NAME,
            hook = index,
            network = %event.context().network(),
            error = %error,
            "Lifecycle hook failed, ignoring"
        );
    }
}

impl<E: LifecycleEvent<Outcome = ()>> HookList<E> {
    /// Runs every hook in order. Failures are logged and skipped.
    pub async fn notify(&self, event: &E) {
        for (index, hook) in self.0.iter().enumerate() {
            if let Err(error) = hook.call(event).await {
                Self::log_failure(event, index, &error);
            }
        }
    }
}

impl HookList<BeforeSettle> {
    /// Runs hooks in order until one aborts.
    pub async fn decide(&self, event: &BeforeSettle) -> SettleDecision {
        for (index, hook) in self.0.iter().enumerate() {
            match hook.call(event).await {
                Ok(SettleDecision::Continue) => {}
                Ok(abort @ SettleDecision::Abort { .. }) => return abort,
                Err(error) => Self::log_failure(event, index, &error),
            }
        }
        SettleDecision::Continue
    }
}

/// All hook lists of a facilitator.
#[derive(Debug, Default)]
pub struct LifecycleHooks {
    pub before_verify: HookList<BeforeVerify>,
    pub after_verify: HookList<AfterVerify>,
    pub verify_failure: HookList<VerifyFailure>,
    pub before_settle: HookList<BeforeSettle>,
    pub after_settle: HookList<AfterSettle>,
    pub settle_failure: HookList<SettleFailure>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_before_verify<H: Hook<BeforeVerify> + 'static>(&mut self, hook: H) -> &mut Self {
        self.before_verify.push(hook);
        self
    }

    pub fn on_after_verify<H: Hook<AfterVerify> + 'static>(&mut self, hook: H) -> &mut Self {
        self.after_verify.push(hook);
        self
    }

    pub fn on_verify_failure<H: Hook<VerifyFailure> + 'static>(&mut self, hook: H) -> &mut Self {
        self.verify_failure.push(hook);
        self
    }

    pub fn on_before_settle<H: Hook<BeforeSettle> + 'static>(&mut self, hook: H) -> &mut Self {
        self.before_settle.push(hook);
        self
    }

    pub fn on_after_settle<H: Hook<AfterSettle> + 'static>(&mut self, hook: H) -> &mut Self {
        self.after_settle.push(hook);
        self
    }

    pub fn on_settle_failure<H: Hook<SettleFailure> + 'static>(&mut self, hook: H) -> &mut Self {
        self.settle_failure.push(hook);
        self
    }
}
