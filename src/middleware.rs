//! Middleware wrapping the command dispatch pipeline.
//!
//! Middleware are registered once at startup; the first registration is the
//! outermost layer. Each layer receives the context plus a [`Next`]
//! continuation and decides whether, and with what, to call further down.
//! The innermost continuation is the dispatch step itself.

use std::sync::Arc;

use async_trait::async_trait;

use crate::handler::CommandContext;

/// One layer around command dispatch.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Process `context`, usually by calling `next.run(context)` somewhere.
    ///
    /// Not calling `next` swallows the command; the layer is then
    /// responsible for queueing a reply itself.
    async fn handle(&self, context: CommandContext, next: Next<'_>);
}

/// The terminal stage a middleware chain ends in.
#[async_trait]
pub(crate) trait Terminal: Send + Sync {
    async fn dispatch(&self, context: CommandContext);
}

/// Continuation used by middleware to invoke the rest of the chain.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    terminal: &'a dyn Terminal,
}

impl<'a> Next<'a> {
    pub(crate) fn new(remaining: &'a [Arc<dyn Middleware>], terminal: &'a dyn Terminal) -> Self {
        Self { remaining, terminal }
    }

    /// Run the remaining layers and finally the dispatch step.
    pub async fn run(self, context: CommandContext) {
        match self.remaining.split_first() {
            Some((layer, rest)) => {
                layer
                    .handle(context, Next::new(rest, self.terminal))
                    .await;
            }
            None => self.terminal.dispatch(context).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::{Middleware, Next, Terminal};
    use crate::{command::Command, handler::CommandContext, state::Session};

    struct Recorder {
        label: &'static str,
        order: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for Recorder {
        async fn handle(&self, context: CommandContext, next: Next<'_>) {
            self.order.lock().expect("order lock").push(self.label);
            next.run(context).await;
        }
    }

    struct End(Arc<Mutex<Vec<&'static str>>>);

    #[async_trait]
    impl Terminal for End {
        async fn dispatch(&self, _context: CommandContext) {
            self.0.lock().expect("order lock").push("dispatch");
        }
    }

    #[tokio::test]
    async fn first_registered_layer_is_outermost() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let layers: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Recorder { label: "outer", order: Arc::clone(&order) }),
            Arc::new(Recorder { label: "inner", order: Arc::clone(&order) }),
        ];
        let end = End(Arc::clone(&order));

        let (replies, _reply_rx) = mpsc::unbounded_channel();
        let (server, _server_rx) = mpsc::unbounded_channel();
        let context = CommandContext::new(
            Command::new("NOOP", ""),
            Arc::new(Session::for_tests()),
            replies,
            server,
        );

        Next::new(&layers, &end).run(context).await;
        assert_eq!(*order.lock().expect("order lock"), ["outer", "inner", "dispatch"]);
    }
}
