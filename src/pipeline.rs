//! Worker loops for the reader/framer, delivery, and writer threads.
//!
//! The three loops share one rule: nothing here blocks for longer than a
//! few milliseconds at a time, so a cleared `alive` flag is observed
//! promptly on every path.

use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::thread;
use std::time::Duration;

use log::{debug, warn};

use crate::cobs;
use crate::config::{
    DELIVER_BATCH, DELIVER_WAIT, FRAME_MAX, IO_RETRY_DELAY, MAX_IDLE_BACKOFF_MS, STAGING_LEN,
    WRITE_BUF_LEN, WRITE_IDLE_YIELD, WRITE_POP_TIMEOUT,
};
use crate::link::SerialLink;
use crate::manager::Shared;
use crate::queue::{ConsumerQueue, ProducerQueue};
use crate::ring::MAX_FRAME_LEN;

/// Drains the port, splits the stream on `0x00` delimiters, decodes each
/// segment and pushes the result into the ring.
pub(crate) fn reader_loop(shared: Arc<Shared>, link: Arc<dyn SerialLink>) {
    if !promote_current_thread() {
        warn!("reader thread priority elevation failed; running at default priority");
    }

    let mut staging = vec![0u8; STAGING_LEN];
    let mut frame = vec![0u8; FRAME_MAX];
    let mut frame_len = 0usize;
    let mut decoded = vec![0u8; FRAME_MAX];
    let mut idle_backoff_ms = 0u64;

    while shared.alive() {
        let n = match link.read(&mut staging) {
            Ok(n) => n,
            Err(e) => {
                debug!("port read failed: {e}");
                thread::sleep(IO_RETRY_DELAY);
                continue;
            }
        };
        if !shared.alive() {
            break;
        }

        if n == 0 {
            // Idle line; back off a little, capped so latency stays low.
            if idle_backoff_ms < MAX_IDLE_BACKOFF_MS {
                idle_backoff_ms += 1;
            }
            thread::sleep(Duration::from_millis(idle_backoff_ms));
            continue;
        }
        idle_backoff_ms = 0;

        let mut rest = &staging[..n];
        while let Some(z) = rest.iter().position(|&b| b == 0) {
            accumulate(&mut frame, &mut frame_len, &rest[..z], &shared);

            if frame_len > 0 && shared.deliver_enabled() {
                match cobs::decode_buf(&frame[..frame_len], &mut decoded) {
                    // A full ring drops the frame; the push counts it.
                    Ok(olen) => {
                        let _ = shared.ring.push(&decoded[..olen]);
                    }
                    // Corrupt segment; the next delimiter re-aligns us.
                    Err(_) => {
                        shared.decode_failed.fetch_add(1, Relaxed);
                    }
                }
            }
            frame_len = 0;
            rest = &rest[z + 1..];
        }
        accumulate(&mut frame, &mut frame_len, rest, &shared);
    }
}

/// Appends a delimiter-free chunk to the frame accumulator. A chunk that
/// would overflow it abandons the partial frame instead; the link is out
/// of step and the framer recovers at the next delimiter.
fn accumulate(frame: &mut [u8], frame_len: &mut usize, chunk: &[u8], shared: &Shared) {
    if chunk.is_empty() {
        return;
    }
    if *frame_len + chunk.len() <= frame.len() {
        frame[*frame_len..*frame_len + chunk.len()].copy_from_slice(chunk);
        *frame_len += chunk.len();
    } else {
        shared.frame_overflow.fetch_add(1, Relaxed);
        *frame_len = 0;
    }
}

/// Waits on the ring and hands decoded frames to the consumer queue in
/// bounded batches.
pub(crate) fn deliver_loop(shared: Arc<Shared>, consumer: Arc<dyn ConsumerQueue>) {
    let mut payload = vec![0u8; MAX_FRAME_LEN];

    while shared.alive() {
        if shared.ring.is_empty() {
            shared.ring.wait_data(DELIVER_WAIT);
            continue;
        }
        if !shared.deliver_enabled() {
            thread::sleep(DELIVER_WAIT);
            continue;
        }

        // The pop copies the payload out under the ring lock and releases
        // it before the queue call-out; the batch bound keeps worst-case
        // latency fixed at line rate.
        for _ in 0..DELIVER_BATCH {
            let Some(len) = shared.ring.pop_into(&mut payload) else {
                break;
            };
            if !consumer.offer_nowait(&payload[..len]) {
                shared.consumer_rejected.fetch_add(1, Relaxed);
            }
            if !shared.alive() || !shared.deliver_enabled() {
                break;
            }
        }
    }
    // Whatever is left in the ring belongs to the manager's teardown.
}

/// Pulls outbound messages, coalesces bursts into one buffer, and writes
/// them to the port verbatim.
pub(crate) fn writer_loop(
    shared: Arc<Shared>,
    producer: Arc<dyn ProducerQueue>,
    link: Arc<dyn SerialLink>,
) {
    let mut buf = vec![0u8; WRITE_BUF_LEN];
    // A popped message that no longer fits the current aggregate is held
    // here and leads the next one, preserving order.
    let mut carry = None;

    while shared.alive() {
        if !shared.deliver_enabled() {
            break;
        }

        let Some(first) = carry
            .take()
            .or_else(|| producer.pop_timeout(WRITE_POP_TIMEOUT))
        else {
            thread::sleep(WRITE_IDLE_YIELD);
            continue;
        };
        if !shared.alive() {
            break;
        }

        // Messages bigger than the aggregate go out as-is.
        if first.len() >= buf.len() {
            write_all(&shared, &*link, &first);
            continue;
        }

        buf[..first.len()].copy_from_slice(&first);
        let mut total = first.len();
        while total < buf.len() {
            let Some(next) = producer.pop_nowait() else {
                break;
            };
            if next.len() > buf.len() - total {
                carry = Some(next);
                break;
            }
            buf[total..total + next.len()].copy_from_slice(&next);
            total += next.len();
        }

        write_all(&shared, &*link, &buf[..total]);
    }
}

/// Pushes `data` through the link, riding out short writes and transient
/// errors until everything is on the wire or the pipeline stops.
fn write_all(shared: &Shared, link: &dyn SerialLink, mut data: &[u8]) {
    while !data.is_empty() && shared.alive() {
        match link.write(data) {
            Ok(0) => thread::sleep(WRITE_IDLE_YIELD),
            Ok(n) => data = &data[n..],
            Err(e) => {
                debug!("port write failed: {e}");
                thread::sleep(IO_RETRY_DELAY);
            }
        }
    }
}

// Raise the calling thread to the highest scheduling class the OS grants
// us. The reader calls this; losing the race for priority is harmless.
#[cfg(unix)]
fn promote_current_thread() -> bool {
    unsafe {
        let mut param: libc::sched_param = std::mem::zeroed();

        let max_fifo = libc::sched_get_priority_max(libc::SCHED_FIFO);
        if max_fifo > 0 {
            param.sched_priority = max_fifo;
            if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_FIFO, &param) == 0 {
                return true;
            }
        }

        let max_rr = libc::sched_get_priority_max(libc::SCHED_RR);
        if max_rr > 0 {
            param.sched_priority = max_rr;
            if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) == 0 {
                return true;
            }
        }

        // Last rung: best-effort niceness.
        libc::nice(-20) >= 0
    }
}

#[cfg(windows)]
fn promote_current_thread() -> bool {
    use winapi::um::processthreadsapi::{
        GetCurrentThread, SetThreadPriority, SetThreadPriorityBoost,
    };
    use winapi::um::winbase::{THREAD_PRIORITY_HIGHEST, THREAD_PRIORITY_TIME_CRITICAL};

    unsafe {
        let handle = GetCurrentThread();
        let elevated = SetThreadPriority(handle, THREAD_PRIORITY_TIME_CRITICAL as i32) != 0
            || SetThreadPriority(handle, THREAD_PRIORITY_HIGHEST as i32) != 0;
        SetThreadPriorityBoost(handle, 0);
        elevated
    }
}

#[cfg(not(any(unix, windows)))]
fn promote_current_thread() -> bool {
    false
}
