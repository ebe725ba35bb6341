use crate::message::Message;
use std::fmt;
use std::sync::Arc;

/// A message transform. Returning `None` drops the message.
pub type InterceptFn = dyn Fn(Message) -> Option<Message> + Send + Sync;

/// A shareable message transform.
///
/// Two interceptors are equal when they are clones of the same transform.
#[derive(Clone)]
pub struct Interceptor(Arc<InterceptFn>);

impl Interceptor {
    pub fn new(f: impl Fn(Message) -> Option<Message> + Send + Sync + 'static) -> Self {
        Interceptor(Arc::new(f))
    }

    pub fn intercept(&self, message: Message) -> Option<Message> {
        (self.0)(message)
    }
}

impl PartialEq for Interceptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Interceptor {}

impl fmt::Debug for Interceptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Interceptor")
            .field(&Arc::as_ptr(&self.0).cast::<()>())
            .finish()
    }
}

/// An ordered, short-circuiting sequence of interceptors.
///
/// The first interceptor to return `None` ends the chain; later ones are
/// not invoked. An empty chain passes messages through unchanged.
///
/// # Examples
///
/// ```
/// use channelfold::{Header, Interceptor, InterceptorChain, Key, Message};
///
/// let drop_tombstones = Interceptor::new(|m: Message| (!m.is_tombstone()).then_some(m));
/// let chain = InterceptorChain::of([drop_tombstones]);
///
/// let deletion = Message::tombstone(Key::of("1"), Header::default());
/// assert!(chain.intercept(deletion).is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterceptorChain {
    interceptors: Vec<Interceptor>,
}

impl InterceptorChain {
    pub fn empty() -> Self {
        InterceptorChain::default()
    }

    pub fn of(interceptors: impl IntoIterator<Item = Interceptor>) -> Self {
        InterceptorChain {
            interceptors: interceptors.into_iter().collect(),
        }
    }

    /// Append `interceptor` to the end of the chain.
    pub fn register(&mut self, interceptor: Interceptor) {
        self.interceptors.push(interceptor);
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    pub fn intercept(&self, message: Message) -> Option<Message> {
        self.interceptors
            .iter()
            .try_fold(message, |message, interceptor| interceptor.intercept(message))
    }
}
