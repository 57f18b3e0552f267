use std::sync::Arc;
use std::time::Duration;

use framelink::{ByteQueue, SerialManagerBuilder};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let port = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/dev/ttyUSB0".to_string());

    let outbound = Arc::new(ByteQueue::new());
    let inbound = Arc::new(ByteQueue::new());

    let manager = SerialManagerBuilder::new(&port)
        .baud(115_200)
        .build(outbound.clone(), inbound.clone());
    manager.start()?;
    println!("listening on {port}; frames follow");

    loop {
        match inbound.pop_timeout(Duration::from_secs(5)) {
            Some(frame) => println!("{:02x?}", &frame[..]),
            None => {
                let stats = manager.stats();
                println!(
                    "idle; dropped={} decode_failed={} rejected={}",
                    stats.ring_dropped, stats.decode_failed, stats.consumer_rejected
                );
            }
        }
    }
}
