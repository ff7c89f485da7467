//! Minimal bus round-trip: one listener, sync and async publication.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use manifold::{impl_message, Handler, Listener, MessageBus};

struct Greeting(&'static str);
impl_message!(static GREETING: Greeting);

#[derive(Default)]
struct Greeter(AtomicUsize);

impl Listener for Greeter {
    fn handlers(&self) -> Vec<Handler> {
        vec![Handler::one(|greeter: &Greeter, greeting: &Greeting| {
            let n = greeter.0.fetch_add(1, Ordering::SeqCst) + 1;
            println!("#{n}: {}", greeting.0);
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
    let greeter = Arc::new(Greeter::default());
    bus.subscribe(greeter.clone());

    bus.publish(Greeting("hello from the calling thread"));
    bus.publish_async(Greeting("hello from a worker"));

    while bus.has_pending_messages() {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(10));
    bus.shutdown();

    println!("delivered: {}", greeter.0.load(Ordering::SeqCst));
}
