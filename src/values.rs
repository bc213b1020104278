use std::any::{Any, TypeId};
use std::sync::Arc;

/// One binding in a context's value chain.
///
/// Bindings are keyed by value type. Lookup walks from the node toward the
/// root, so the binding nearest the node shadows earlier ones.
pub(crate) struct ValueChain {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    next: Option<Arc<ValueChain>>,
}

impl ValueChain {
    pub(crate) fn push<V: Send + Sync + 'static>(
        next: Option<Arc<ValueChain>>,
        value: V,
    ) -> Arc<ValueChain> {
        Arc::new(ValueChain {
            key: TypeId::of::<V>(),
            value: Arc::new(value),
            next,
        })
    }

    pub(crate) fn get<V: Send + Sync + 'static>(&self) -> Option<Arc<V>> {
        let mut node = self;
        loop {
            if node.key == TypeId::of::<V>() {
                return Arc::clone(&node.value).downcast::<V>().ok();
            }
            node = node.next.as_deref()?;
        }
    }
}
