//! Filter trait and chain composition.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use stratus_core::{BoxError, BoxFuture, CallContext, MethodError, RegistrationError};

/// Result of running a filter or method body.
pub type FilterResult = Result<(), MethodError>;

/// Trait for wrapping a method invocation.
///
/// A filter receives the call context and the rest of the chain. It may do
/// work before and after `next.run(ctx)`, or return without calling it to
/// short-circuit every filter below it and the method body.
///
/// Filter instances are shared by all concurrent calls to a method; keep
/// per-call state on the [`CallContext`].
///
/// ## Example
///
/// ```rust
/// use stratus_core::{BoxFuture, CallContext, Status};
/// use stratus_middleware::{Filter, FilterResult, Next};
///
/// struct RequireUser;
///
/// impl Filter for RequireUser {
///     fn invoke<'a>(&'a self, ctx: &'a mut CallContext, next: Next<'a>) -> BoxFuture<'a, FilterResult> {
///         Box::pin(async move {
///             if ctx.context().get_metadata("user").is_none() {
///                 return Err(Status::permission_denied("no user").into());
///             }
///             next.run(ctx).await
///         })
///     }
/// }
/// ```
pub trait Filter: Send + Sync + 'static {
    /// Run this filter around the rest of the chain.
    fn invoke<'a>(&'a self, ctx: &'a mut CallContext, next: Next<'a>) -> BoxFuture<'a, FilterResult>;
}

/// The innermost step of a chain: the bound method itself.
pub trait MethodBody: Send + Sync + 'static {
    /// Decode the request from `ctx`, run the method, store the response.
    fn call<'a>(&'a self, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult>;
}

/// The remainder of a filter chain.
///
/// Consumed by [`Next::run`], so a filter can continue the chain at most once.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    body: &'a dyn MethodBody,
}

impl<'a> Next<'a> {
    /// Continue with the next filter, or the body if none are left.
    pub fn run<'b>(self, ctx: &'b mut CallContext) -> BoxFuture<'b, FilterResult>
    where
        'a: 'b,
    {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.invoke(
                ctx,
                Next {
                    filters: rest,
                    body: self.body,
                },
            ),
            None => self.body.call(ctx),
        }
    }

    /// Number of filters still ahead of the body.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

/// Type-keyed container handed to filter factories.
#[derive(Clone, Default)]
pub struct Dependencies(HashMap<TypeId, Arc<dyn Any + Send + Sync>>);

impl Dependencies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dependency.
    #[must_use]
    pub fn with<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(Arc::new(value));
        self
    }

    /// Register a shared dependency, replacing any previous one of that type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: Arc<T>) {
        self.0.insert(TypeId::of::<T>(), value);
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.0.get(&TypeId::of::<T>())?.clone().downcast::<T>().ok()
    }

    /// Like [`get`](Self::get), but a missing dependency is an error.
    pub fn require<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, BoxError> {
        self.get::<T>()
            .ok_or_else(|| format!("missing dependency `{}`", std::any::type_name::<T>()).into())
    }
}

impl fmt::Debug for Dependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependencies").field("len", &self.0.len()).finish()
    }
}

type FilterFactory = Arc<dyn Fn(&Dependencies) -> Result<Arc<dyn Filter>, BoxError> + Send + Sync>;

#[derive(Clone)]
enum FilterSource {
    Instance(Arc<dyn Filter>),
    Factory {
        name: &'static str,
        factory: FilterFactory,
    },
}

/// How to obtain one filter of a chain, and where it sorts.
///
/// Lower `order` runs further out. Filters with equal order keep their
/// declaration order. The default order is `i32::MAX`.
#[derive(Clone)]
pub struct FilterDescriptor {
    order: i32,
    source: FilterSource,
}

impl FilterDescriptor {
    /// Order of descriptors that don't set one.
    pub const DEFAULT_ORDER: i32 = i32::MAX;

    /// Use one filter instance for every handler it is attached to.
    #[must_use]
    pub fn new(filter: impl Filter) -> Self {
        Self::shared(Arc::new(filter))
    }

    #[must_use]
    pub fn shared(filter: Arc<dyn Filter>) -> Self {
        Self {
            order: Self::DEFAULT_ORDER,
            source: FilterSource::Instance(filter),
        }
    }

    /// Build the filter from [`Dependencies`], once per handler.
    #[must_use]
    pub fn factory<F, T>(factory: F) -> Self
    where
        F: Fn(&Dependencies) -> Result<T, BoxError> + Send + Sync + 'static,
        T: Filter,
    {
        Self {
            order: Self::DEFAULT_ORDER,
            source: FilterSource::Factory {
                name: std::any::type_name::<T>(),
                factory: Arc::new(move |deps| Ok(Arc::new(factory(deps)?) as Arc<dyn Filter>)),
            },
        }
    }

    /// Set the sort order.
    #[must_use]
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn order(&self) -> i32 {
        self.order
    }

    fn instantiate(&self, deps: &Dependencies) -> Result<Arc<dyn Filter>, RegistrationError> {
        match &self.source {
            FilterSource::Instance(filter) => Ok(filter.clone()),
            FilterSource::Factory { name, factory } => {
                factory(deps).map_err(|e| RegistrationError::FilterConstruction {
                    filter: (*name).to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl fmt::Debug for FilterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            FilterSource::Instance(_) => "instance",
            FilterSource::Factory { name, .. } => name,
        };
        f.debug_struct("FilterDescriptor")
            .field("order", &self.order)
            .field("source", &source)
            .finish()
    }
}

/// An ordered, instantiated filter chain, built once per handler.
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Arc<[Arc<dyn Filter>]>,
}

impl FilterChain {
    /// Build a chain from descriptors given in declaration order.
    ///
    /// Descriptors are stably sorted by ascending order, then each is
    /// instantiated exactly once. The first filter of the sorted list
    /// becomes the outermost.
    pub fn compose<'d, I>(descriptors: I, deps: &Dependencies) -> Result<Self, RegistrationError>
    where
        I: IntoIterator<Item = &'d FilterDescriptor>,
    {
        let mut sorted: Vec<&FilterDescriptor> = descriptors.into_iter().collect();
        sorted.sort_by_key(|d| d.order);

        let filters = sorted
            .into_iter()
            .map(|d| d.instantiate(deps))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            filters: filters.into(),
        })
    }

    /// Run the chain around `body`.
    pub fn run<'a>(&'a self, body: &'a dyn MethodBody, ctx: &'a mut CallContext) -> BoxFuture<'a, FilterResult> {
        Next {
            filters: &self.filters,
            body,
        }
        .run(ctx)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.filters.len()
    }
}

impl fmt::Debug for FilterChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain").field("len", &self.filters.len()).finish()
    }
}
