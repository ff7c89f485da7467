//! Observing unmatched publications through `DeadMessage`.

use std::any::Any;
use std::sync::Arc;

use manifold::{impl_message, DeadMessage, Handler, Listener, MessageBus};

struct Telemetry(u32);
impl_message!(static TELEMETRY: Telemetry);

struct DeadLetterOffice;

impl Listener for DeadLetterOffice {
    fn handlers(&self) -> Vec<Handler> {
        vec![Handler::one(|_: &DeadLetterOffice, dead: &DeadMessage| {
            for envelope in dead.published() {
                println!("undeliverable: {}", envelope.type_info().name());
            }
            Ok(())
        })]
    }

    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }
}

fn main() {
    tracing_subscriber::fmt().init();

    let bus = MessageBus::new().expect("bus start");
    bus.subscribe(Arc::new(DeadLetterOffice));

    // Nothing subscribes to Telemetry, so the dead-letter office hears it.
    bus.publish(Telemetry(42));
    bus.shutdown();
}
