//! Demo of triple buffering between an audio synthesis thread and a
//! playback thread
//!
//! The synthesis thread fills in one block of samples per audio callback
//! period and commits it, the playback thread polls at its own pace and
//! plays whatever the freshest complete block is. Neither thread ever waits
//! for the other one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tricell::TripleBuffer;

/// One block of audio samples, tagged with a monotonically increasing frame
/// number so that the playback side can tell fresh data from stale data
#[derive(Clone)]
struct AudioFrame {
    samples: [f32; 512],
    frame_id: i64,
}
//
impl Default for AudioFrame {
    fn default() -> Self {
        AudioFrame {
            samples: [0.0; 512],
            frame_id: -1,
        }
    }
}

fn main() {
    // This is the buffer that the two threads will share
    let (mut producer, mut consumer) = TripleBuffer::<AudioFrame>::default().split();

    // Used to ask both threads to stop at the end of the demo
    let stop_flag = Arc::new(AtomicBool::new(false));
    let producer_stop = stop_flag.clone();
    let consumer_stop = stop_flag.clone();

    // The synthesis thread prepares one frame per callback period
    let synthesis = thread::spawn(move || {
        let mut frame_id = 0i64;
        while !producer_stop.load(Ordering::Relaxed) {
            // Fill the write buffer in place, then publish it
            let frame = producer.write();
            frame.frame_id = frame_id;
            let amplitude = (frame_id % 100) as f32 * 0.01;
            for sample in frame.samples.iter_mut() {
                *sample = amplitude;
            }
            producer.commit();
            println!("Synthesis: committed frame {}", frame_id);

            // Simulate the cadence of 512-sample frames at 48 kHz
            thread::sleep(Duration::from_micros(10_600));
            frame_id += 1;
        }
    });

    // The playback thread fetches the freshest frame at its own pace
    let playback = thread::spawn(move || {
        let mut last_frame_id = -1i64;
        while !consumer_stop.load(Ordering::Relaxed) {
            let frame = consumer.read();
            if frame.frame_id > last_frame_id {
                last_frame_id = frame.frame_id;
                println!("Playback: playing frame {}", last_frame_id);
            }
            thread::sleep(Duration::from_millis(10));
        }
    });

    // Let the simulation run for a while, then shut it down
    thread::sleep(Duration::from_secs(2));
    stop_flag.store(true, Ordering::Relaxed);
    synthesis.join().unwrap();
    playback.join().unwrap();
}
