//! Serialises all outbound frames onto the single transport in FIFO order,
//! with a priority fast path for control frames (`spec.md` §4.5). One
//! writer thread drains this queue and owns the transport's write half
//! exclusively; frames are written atomically, header and payload
//! together.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use bytes::Bytes;

use crate::frame::FrameHeader;

pub(crate) struct OutboundFrame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

struct Queues {
    control: VecDeque<OutboundFrame>,
    data: VecDeque<OutboundFrame>,
    closed: bool,
}

/// FIFO queue of outbound frames. `PING`, `WINDOW_UPDATE`, `GO_AWAY` and
/// `RST`-flagged frames jump the `data` queue; within a priority level,
/// frames stay FIFO.
pub(crate) struct Scheduler {
    queues: Mutex<Queues>,
    cv: Condvar,
}

fn is_control(header: &FrameHeader) -> bool {
    use crate::frame::{Flags, FrameType};
    !matches!(header.frame_type, FrameType::Data) || header.flags.contains(Flags::RST)
}

impl Scheduler {
    pub(crate) fn new() -> Self {
        Self {
            queues: Mutex::new(Queues { control: VecDeque::new(), data: VecDeque::new(), closed: false }),
            cv: Condvar::new(),
        }
    }

    /// Non-blocking from the caller's perspective: the real back-pressure
    /// is each stream's `send_window`, not this queue's depth.
    pub(crate) fn submit(&self, header: FrameHeader, payload: Bytes) {
        let mut q = self.queues.lock().unwrap();
        if q.closed {
            return;
        }
        let frame = OutboundFrame { header, payload };
        if is_control(&frame.header) {
            q.control.push_back(frame);
        } else {
            q.data.push_back(frame);
        }
        drop(q);
        self.cv.notify_one();
    }

    /// Blocks until a frame is available or the scheduler is closed.
    pub(crate) fn pop(&self) -> Option<OutboundFrame> {
        let mut q = self.queues.lock().unwrap();
        loop {
            if let Some(frame) = q.control.pop_front() {
                return Some(frame);
            }
            if let Some(frame) = q.data.pop_front() {
                return Some(frame);
            }
            if q.closed {
                return None;
            }
            q = self.cv.wait(q).unwrap();
        }
    }

    /// Wakes the writer thread for the last time; `pop` drains whatever
    /// remains, then returns `None` forever after.
    pub(crate) fn close(&self) {
        let mut q = self.queues.lock().unwrap();
        q.closed = true;
        drop(q);
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Flags, GoAwayReason};

    #[test]
    fn control_frames_overtake_queued_data() {
        let sched = Scheduler::new();
        sched.submit(FrameHeader::data(1, Flags::empty(), 0), Bytes::new());
        sched.submit(FrameHeader::go_away(GoAwayReason::Normal), Bytes::new());
        let first = sched.pop().unwrap();
        assert!(matches!(first.header.frame_type, crate::frame::FrameType::GoAway));
    }

    #[test]
    fn fifo_within_a_priority_level() {
        let sched = Scheduler::new();
        sched.submit(FrameHeader::data(1, Flags::empty(), 0), Bytes::from_static(&[1]));
        sched.submit(FrameHeader::data(2, Flags::empty(), 0), Bytes::from_static(&[2]));
        assert_eq!(sched.pop().unwrap().header.stream_id, 1);
        assert_eq!(sched.pop().unwrap().header.stream_id, 2);
    }

    #[test]
    fn close_drains_then_returns_none() {
        let sched = Scheduler::new();
        sched.submit(FrameHeader::data(1, Flags::empty(), 0), Bytes::new());
        sched.close();
        assert!(sched.pop().is_some());
        assert!(sched.pop().is_none());
    }
}
