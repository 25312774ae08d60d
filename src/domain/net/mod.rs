use std::sync::Arc;

use crate::error::Result;

pub mod cursor;
pub mod net;
pub mod task;

/// Compiles a task tree into a shareable net. See [`net::Net::compile`].
pub fn build_graph(task: &task::Task) -> Result<Arc<net::Net>> {
    Ok(Arc::new(net::Net::compile(task)?))
}
