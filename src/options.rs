//! Functional options applied at provider construction time.
//!
//! Every provider constructor takes a base configuration plus a sequence of
//! [`Opt`] values. Options are one-shot mutations applied in declaration
//! order; when two options touch the same field the later one wins. They are
//! how providers accept optional knobs (injected clients for testing,
//! timeout overrides, TLS settings) without bloating their config structs.

/// A one-shot mutation of a provider's option struct.
///
/// Constructed through the `set_*` helpers each provider exports, e.g.
/// `icmp::set_timeout(Duration::from_secs(2))`.
pub struct Opt<T>(Box<dyn FnOnce(&mut T) + Send>);

impl<T> Opt<T> {
    /// Wrap a mutation closure as an option.
    pub fn new(f: impl FnOnce(&mut T) + Send + 'static) -> Self {
        Opt(Box::new(f))
    }

    /// Consume the option, mutating `target`.
    pub fn apply(self, target: &mut T) {
        (self.0)(target)
    }
}

/// Apply `opts` to `target` in order.
pub fn apply<T>(target: &mut T, opts: impl IntoIterator<Item = Opt<T>>) {
    for opt in opts {
        opt.apply(target);
    }
}
