//! The receive loop: sole reader of the transport (`spec.md` §4.6, §5).
//! Parses frames and dispatches them to streams or control handlers. Any
//! read/decode fault here is fatal to the whole session; per-stream faults
//! (duplicate SYN, window overrun) are handled locally with a stateless
//! `RST` and never reach this function's error return.

use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::buffer::Terminal;
use crate::error::Error;
use crate::frame::{Flags, FrameHeader, FrameType, GoAwayReason, HEADER_LEN};
use crate::session::SessionShared;
use crate::stream::{SendState, StreamState};

pub(crate) fn run<R: Read>(mut reader: R, shared: Arc<SessionShared>) {
    loop {
        let mut header_buf = [0u8; HEADER_LEN];
        if let Err(e) = read_fully(&mut reader, &mut header_buf) {
            debug!(error = %e, "receive loop stopped: transport read failed");
            shared.shutdown(Some(e));
            return;
        }

        let header = match FrameHeader::decode(&header_buf, shared.max_payload()) {
            Ok(h) => h,
            Err(e) => {
                error!(error = %e, "fatal protocol error decoding frame header");
                shared.shutdown(Some(e));
                return;
            }
        };

        let payload = if header.payload_len() > 0 {
            let mut buf = vec![0u8; header.payload_len()];
            if let Err(e) = read_fully(&mut reader, &mut buf) {
                shared.shutdown(Some(e));
                return;
            }
            buf
        } else {
            Vec::new()
        };

        let result = match header.frame_type {
            FrameType::Data => handle_data(&shared, &header, payload),
            FrameType::WindowUpdate => handle_window_update(&shared, &header),
            FrameType::Ping => {
                handle_ping(&shared, &header);
                Ok(())
            }
            FrameType::GoAway => {
                handle_go_away(&shared, &header);
                Ok(())
            }
        };

        if let Err(e) = result {
            error!(error = %e, "fatal protocol error, killing session");
            shared.shutdown(Some(e));
            return;
        }
    }
}

fn read_fully(reader: &mut impl Read, buf: &mut [u8]) -> Result<(), Error> {
    reader.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionReset
        } else {
            Error::Io(e)
        }
    })
}

fn reject_with_rst(shared: &Arc<SessionShared>, id: u32) {
    shared.submit(FrameHeader::data(id, Flags::RST, 0), Bytes::new());
}

/// Incoming `SYN` (on `DATA` or a header-only control frame) creates the
/// stream if the id is fresh and rightfully the peer's parity; otherwise a
/// stateless `RST` rejects it without touching session state.
fn admit_new_stream(
    shared: &Arc<SessionShared>,
    id: u32,
) -> Result<Option<Arc<StreamState>>, Error> {
    if shared.stream_exists(id) {
        warn!(stream_id = id, "peer sent SYN for an already-open stream, rejecting with RST");
        reject_with_rst(shared, id);
        return Ok(None);
    }
    if shared.role().owns(id) {
        return Err(Error::Protocol(format!(
            "peer opened stream {id} using our own identifier parity"
        )));
    }
    let stream = shared.create_incoming_stream(id);
    if !shared.push_accept(stream.clone()) {
        debug!(stream_id = id, "accept backlog full, rejecting SYN");
        shared.remove_stream(id);
        reject_with_rst(shared, id);
        return Ok(None);
    }
    Ok(Some(stream))
}

fn apply_control_flags(shared: &Arc<SessionShared>, stream: &Arc<StreamState>, header: &FrameHeader) {
    if header.flags.contains(Flags::ACK) {
        stream.on_peer_ack();
    }
    if header.flags.contains(Flags::RST) {
        stream.buffer.terminate(Terminal::Reset);
        stream.force_send_terminal(SendState::Reset);
        shared.remove_stream(header.stream_id);
    } else if header.flags.contains(Flags::FIN) {
        // Edge case: a DATA+FIN frame's payload was already pushed to the
        // buffer by the caller before this runs, so readers drain it
        // before observing end-of-stream (`spec.md` §9 Open Question b).
        stream.buffer.terminate(Terminal::Fin);
        if stream.both_closed() {
            shared.remove_stream(header.stream_id);
        }
    }
}

fn handle_data(
    shared: &Arc<SessionShared>,
    header: &FrameHeader,
    payload: Vec<u8>,
) -> Result<(), Error> {
    let id = header.stream_id;

    let stream = if header.flags.contains(Flags::SYN) {
        match admit_new_stream(shared, id)? {
            Some(s) => s,
            None => return Ok(()),
        }
    } else {
        match shared.get_stream(id) {
            Some(s) => s,
            None => {
                reject_with_rst(shared, id);
                return Ok(());
            }
        }
    };

    if !payload.is_empty() {
        if stream.buffer.push(&payload).is_err() {
            warn!(stream_id = id, "receive window exceeded, resetting stream locally");
            stream.buffer.terminate(Terminal::Reset);
            stream.force_send_terminal(SendState::Reset);
            reject_with_rst(shared, id);
            shared.remove_stream(id);
            return Ok(());
        }
    }
    apply_control_flags(shared, &stream, header);
    Ok(())
}

fn handle_window_update(shared: &Arc<SessionShared>, header: &FrameHeader) -> Result<(), Error> {
    let id = header.stream_id;

    let stream = if header.flags.contains(Flags::SYN) {
        match admit_new_stream(shared, id)? {
            Some(s) => s,
            None => return Ok(()),
        }
    } else {
        match shared.get_stream(id) {
            Some(s) => s,
            None => {
                reject_with_rst(shared, id);
                return Ok(());
            }
        }
    };

    stream.add_send_window(header.length);
    apply_control_flags(shared, &stream, header);
    Ok(())
}

fn handle_ping(shared: &Arc<SessionShared>, header: &FrameHeader) {
    if header.flags.contains(Flags::SYN) {
        shared.submit(FrameHeader::ping(Flags::ACK, header.length), Bytes::new());
    }
    if header.flags.contains(Flags::ACK) {
        shared.pings().complete(header.length);
    }
}

fn handle_go_away(shared: &Arc<SessionShared>, header: &FrameHeader) {
    let reason = GoAwayReason::from_u32(header.length);
    debug!(?reason, "peer sent GO_AWAY, no new locally-opened streams will be accepted by it");
    shared.go_away_remote();
}
