use std::sync::Arc;

use auth::Registry;
use store::Store;

use crate::hub::Hub;
use crate::limits::Limits;

/// Shared collaborators handed to every session.
pub struct Context {
    pub limits: Limits,
    pub store: Arc<dyn Store>,
    pub auth: Registry,
    pub hub: Arc<Hub>,
}

impl Context {
    pub fn new(limits: Limits, store: Arc<dyn Store>, auth: Registry) -> Arc<Self> {
        let hub = Hub::new(store.clone(), limits.clone());
        Arc::new(Self {
            limits,
            store,
            auth,
            hub,
        })
    }
}
