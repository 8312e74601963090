use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::BytesMut;
use tracing::{debug, trace};

use reglink_wire::{request_flags, ControlReply, ControlRequest, CONTROL_PACKET_SIZE};

use crate::error::{Result, SessionError};
use crate::link::{ControlLink, UdpLink};
use crate::timeout::Timeout;

/// First sequence number a fresh session uses. Far from the device's
/// post-reset latched value of 0, so a forgotten resync shows up as a
/// sequence-check fault instead of a silent success.
pub const INITIAL_SEQUENCE: u16 = 0x100;

/// Identity of one physical device's control endpoint.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub peer_ip: String,
    pub control_port: u16,
    pub serial_number: String,
    /// Ask the device to verify our sequence number on every request,
    /// faulting if another requester has slipped in between.
    pub sequence_check: bool,
}

struct Inner {
    link: Option<Box<dyn ControlLink>>,
    sequence: u16,
}

/// Per-attempt request/reply exchange.
///
/// One attempt sends a single datagram and waits one receive window for a
/// reply matching its sequence number. Stale replies from earlier attempts
/// are discarded without leaving `AwaitingReply`; retransmission happens at
/// the engine level with a fresh sequence number per attempt.
enum ExchangeState {
    Sending,
    AwaitingReply,
    Matched(ControlReply),
    Expired,
}

/// A control-plane session to one device.
///
/// All register operations are synchronous and mutually exclusive: the
/// firmware processes one outstanding command at a time, so a single mutex
/// spans serialize → send → receive → match. Any number of threads may
/// call concurrently; they block rather than interleave.
pub struct ControlSession {
    config: SessionConfig,
    inner: Mutex<Inner>,
    read_retries: AtomicU32,
    write_retries: AtomicU32,
}

impl ControlSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                link: None,
                sequence: INITIAL_SEQUENCE,
            }),
            read_retries: AtomicU32::new(0),
            write_retries: AtomicU32::new(0),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn serial_number(&self) -> &str {
        &self.config.serial_number
    }

    /// Open the UDP link to the device's control port.
    pub fn connect(&self) -> Result<()> {
        let link = UdpLink::open(&self.config.peer_ip, self.config.control_port)?;
        self.lock_inner().link = Some(Box::new(link));
        Ok(())
    }

    /// Attach an already-open link. Simulators and tests use this in place
    /// of [`connect`](Self::connect).
    pub fn attach(&self, link: Box<dyn ControlLink>) {
        self.lock_inner().link = Some(link);
    }

    /// Close the link. Register operations fail `NotConnected` afterwards.
    pub fn close(&self) {
        self.lock_inner().link = None;
    }

    pub fn is_connected(&self) -> bool {
        self.lock_inner().link.is_some()
    }

    /// Sequence number the next request will carry.
    pub fn sequence(&self) -> u16 {
        self.lock_inner().sequence
    }

    /// Reset the counter to a known value, after a device reset has reset
    /// the device's latched sequence number.
    pub fn resync_sequence(&self, sequence: u16) {
        self.lock_inner().sequence = sequence;
    }

    /// Retries performed by reads over the session lifetime, for diagnostics.
    pub fn read_retries(&self) -> u32 {
        self.read_retries.load(Ordering::Relaxed)
    }

    /// Retries performed by writes over the session lifetime, for diagnostics.
    pub fn write_retries(&self) -> u32 {
        self.write_retries.load(Ordering::Relaxed)
    }

    /// Read one 32-bit register with the default timeout policy.
    pub fn read_uint32(&self, address: u32) -> Result<u32> {
        self.read_uint32_with(address, &Timeout::default(), self.config.sequence_check)
    }

    /// Read one 32-bit register.
    ///
    /// Retries with a fresh sequence number on every silent attempt until
    /// the timeout's deadline, then fails `Timeout` naming the address.
    pub fn read_uint32_with(
        &self,
        address: u32,
        timeout: &Timeout,
        check_sequence: bool,
    ) -> Result<u32> {
        check_alignment(address)?;
        let mut attempts: u32 = 0;
        let outcome = loop {
            attempts += 1;
            match self.read_once(address, timeout, check_sequence) {
                Ok(Some(value)) => break Ok(value),
                Ok(None) => {
                    if !timeout.retry() {
                        break Err(SessionError::Timeout {
                            operation: "read_uint32",
                            address,
                        });
                    }
                }
                Err(err) => break Err(err),
            }
        };
        self.read_retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
        outcome
    }

    /// Write one 32-bit register with the default timeout policy.
    pub fn write_uint32(&self, address: u32, value: u32) -> Result<bool> {
        self.write_uint32_with(
            address,
            value,
            &Timeout::default(),
            true,
            self.config.sequence_check,
        )
    }

    /// Write one 32-bit register.
    ///
    /// With `retry` set, silent attempts are retried with fresh sequence
    /// numbers until the deadline, then fail `Timeout`. With `retry`
    /// cleared the write is attempted once and a missing ack yields
    /// `Ok(false)` — the path used for the reset trigger, which never
    /// replies. Active rejection by the device is never retried.
    pub fn write_uint32_with(
        &self,
        address: u32,
        value: u32,
        timeout: &Timeout,
        retry: bool,
        check_sequence: bool,
    ) -> Result<bool> {
        check_alignment(address)?;
        let mut attempts: u32 = 0;
        let outcome = loop {
            attempts += 1;
            match self.write_once(address, value, timeout, check_sequence) {
                Ok(true) => break Ok(true),
                Ok(false) => {
                    if !retry {
                        // no ack expected; the caller asked us to swallow this
                        break Ok(false);
                    }
                    if !timeout.retry() {
                        break Err(SessionError::Timeout {
                            operation: "write_uint32",
                            address,
                        });
                    }
                }
                Err(err) => break Err(err),
            }
        };
        self.write_retries
            .fetch_add(attempts.saturating_sub(1), Ordering::Relaxed);
        outcome
    }

    /// One read attempt. `Ok(None)` means no reply arrived in the window.
    fn read_once(
        &self,
        address: u32,
        timeout: &Timeout,
        check_sequence: bool,
    ) -> Result<Option<u32>> {
        let mut inner = self.lock_inner();
        let sequence = next_sequence(&mut inner);
        let request = ControlRequest::ReadDword {
            sequence,
            flags: request_flags(check_sequence),
            address,
        };
        let reply = match self.exchange(&mut inner, &request, timeout)? {
            Some(reply) => reply,
            None => return Ok(None),
        };
        if !reply.response_code.is_success() {
            return Err(SessionError::Protocol {
                operation: "read_uint32",
                address,
                code: reply.response_code,
            });
        }
        let payload = reply.read_payload()?;
        if payload.address != address {
            return Err(SessionError::AddressMismatch {
                expected: address,
                actual: payload.address,
            });
        }
        debug!(
            address = format_args!("{address:#x}"),
            value = format_args!("{:#x}", payload.value),
            latched_sequence = payload.latched_sequence,
            "read_uint32"
        );
        Ok(Some(payload.value))
    }

    /// One write attempt. `Ok(false)` means no ack arrived in the window.
    fn write_once(
        &self,
        address: u32,
        value: u32,
        timeout: &Timeout,
        check_sequence: bool,
    ) -> Result<bool> {
        let mut inner = self.lock_inner();
        let sequence = next_sequence(&mut inner);
        let request = ControlRequest::WriteDword {
            sequence,
            flags: request_flags(check_sequence),
            address,
            value,
        };
        let reply = match self.exchange(&mut inner, &request, timeout)? {
            Some(reply) => reply,
            None => return Ok(false),
        };
        if !reply.response_code.is_success() {
            return Err(SessionError::Protocol {
                operation: "write_uint32",
                address,
                code: reply.response_code,
            });
        }
        debug!(
            address = format_args!("{address:#x}"),
            value = format_args!("{value:#x}"),
            "write_uint32"
        );
        Ok(true)
    }

    /// Drive one attempt through the exchange state machine.
    ///
    /// Transitions: Sending → AwaitingReply on send; AwaitingReply →
    /// Matched on a sequence-matched reply, → Expired when the window
    /// closes, → AwaitingReply (self) on a stale reply. Holding `inner`
    /// across the whole exchange is what guarantees a single in-flight
    /// request per session.
    fn exchange(
        &self,
        inner: &mut Inner,
        request: &ControlRequest,
        timeout: &Timeout,
    ) -> Result<Option<ControlReply>> {
        let sequence = request.sequence();
        let mut frame = BytesMut::with_capacity(CONTROL_PACKET_SIZE);
        request.encode(&mut frame);

        let link = inner.link.as_mut().ok_or(SessionError::NotConnected)?;
        let mut state = ExchangeState::Sending;
        loop {
            state = match state {
                ExchangeState::Sending => {
                    trace!(sequence, "sending control request");
                    link.send(&frame)?;
                    ExchangeState::AwaitingReply
                }
                ExchangeState::AwaitingReply => {
                    let window = timeout.recv_window();
                    match link.recv(window)? {
                        Some(datagram) => {
                            let reply = ControlReply::decode(&datagram)?;
                            if reply.sequence == sequence {
                                ExchangeState::Matched(reply)
                            } else {
                                // reply to an abandoned attempt; it must
                                // never satisfy this call
                                trace!(
                                    sequence,
                                    stale = reply.sequence,
                                    "discarding stale reply"
                                );
                                ExchangeState::AwaitingReply
                            }
                        }
                        None => ExchangeState::Expired,
                    }
                }
                ExchangeState::Matched(reply) => return Ok(Some(reply)),
                ExchangeState::Expired => return Ok(None),
            };
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Mint the next sequence number. Takes the locked inner state so callers
/// cannot forget they must hold the exchange lock.
fn next_sequence(inner: &mut Inner) -> u16 {
    let sequence = inner.sequence;
    inner.sequence = inner.sequence.wrapping_add(1);
    sequence
}

fn check_alignment(address: u32) -> Result<()> {
    if address % 4 != 0 {
        return Err(SessionError::InvalidArgument(format!(
            "invalid address {address:#x}, has to be a multiple of four"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::thread;
    use std::time::Duration;

    use reglink_wire::{ReadPayload, ResponseCode, RD_DWORD, WR_DWORD};

    use super::*;

    #[derive(Default)]
    struct ScriptState {
        sent: Vec<ControlRequest>,
        pending: VecDeque<Vec<u8>>,
    }

    type Responder = Box<dyn FnMut(&ControlRequest) -> Vec<Vec<u8>> + Send>;

    /// Link whose replies come from a responder closure instead of a socket.
    struct ScriptedLink {
        state: Arc<Mutex<ScriptState>>,
        responder: Responder,
    }

    impl ControlLink for ScriptedLink {
        fn send(&mut self, datagram: &[u8]) -> io::Result<()> {
            let request = ControlRequest::decode(datagram)
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err.to_string()))?;
            let replies = (self.responder)(&request);
            let mut state = self.state.lock().unwrap();
            state.sent.push(request);
            state.pending.extend(replies);
            Ok(())
        }

        fn recv(&mut self, window: Duration) -> io::Result<Option<Vec<u8>>> {
            let reply = self.state.lock().unwrap().pending.pop_front();
            if reply.is_none() {
                // pace the retry loop the way a real socket would
                thread::sleep(window.min(Duration::from_millis(2)));
            }
            Ok(reply)
        }
    }

    fn session_with(responder: Responder) -> (ControlSession, Arc<Mutex<ScriptState>>) {
        let state = Arc::new(Mutex::new(ScriptState::default()));
        let session = ControlSession::new(SessionConfig {
            peer_ip: "192.168.0.2".to_string(),
            control_port: 8192,
            serial_number: "0102030405".to_string(),
            sequence_check: false,
        });
        session.attach(Box::new(ScriptedLink {
            state: Arc::clone(&state),
            responder,
        }));
        (session, state)
    }

    fn encode_reply(reply: &ControlReply) -> Vec<u8> {
        let mut buf = BytesMut::new();
        reply.encode(&mut buf);
        buf.to_vec()
    }

    fn read_reply(sequence: u16, code: ResponseCode, address: u32, value: u32) -> Vec<u8> {
        encode_reply(&ControlReply {
            cmd_code: RD_DWORD,
            flags: 0,
            sequence,
            response_code: code,
            payload: Some(ReadPayload {
                address,
                value,
                latched_sequence: sequence,
            }),
        })
    }

    fn write_ack(sequence: u16) -> Vec<u8> {
        encode_reply(&ControlReply {
            cmd_code: WR_DWORD,
            flags: 0,
            sequence,
            response_code: ResponseCode::Success,
            payload: None,
        })
    }

    #[test]
    fn read_returns_matched_value() {
        let (session, state) = session_with(Box::new(|request| {
            vec![read_reply(
                request.sequence(),
                ResponseCode::Success,
                request.address(),
                0xDEAD_BEEF,
            )]
        }));
        assert_eq!(session.read_uint32(0x4).unwrap(), 0xDEAD_BEEF);
        assert_eq!(state.lock().unwrap().sent.len(), 1);
        assert_eq!(session.read_retries(), 0);
    }

    #[test]
    fn read_protocol_error_carries_response_code() {
        let (session, _) = session_with(Box::new(|request| {
            vec![read_reply(
                request.sequence(),
                ResponseCode::InvalidAddr,
                request.address(),
                0,
            )]
        }));
        let err = session.read_uint32(0x4).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol {
                code: ResponseCode::InvalidAddr,
                ..
            }
        ));
    }

    #[test]
    fn stale_reply_never_satisfies_a_call() {
        let (session, _) = session_with(Box::new(|request| {
            vec![
                read_reply(
                    request.sequence().wrapping_sub(1),
                    ResponseCode::Success,
                    request.address(),
                    0xBAD,
                ),
                read_reply(
                    request.sequence(),
                    ResponseCode::Success,
                    request.address(),
                    0x600D,
                ),
            ]
        }));
        assert_eq!(session.read_uint32(0x10).unwrap(), 0x600D);
    }

    #[test]
    fn read_times_out_after_deadline_with_distinct_sequences() {
        let (session, state) = session_with(Box::new(|_| Vec::new()));
        let timeout = Timeout::new(Duration::from_millis(50), Duration::from_millis(5));
        let err = session.read_uint32_with(0x80, &timeout, false).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Timeout {
                operation: "read_uint32",
                address: 0x80,
            }
        ));
        assert!(timeout.elapsed() >= Duration::from_millis(50));

        let state = state.lock().unwrap();
        assert!(state.sent.len() >= 2, "expected retries, got {}", state.sent.len());
        let mut sequences: Vec<u16> = state.sent.iter().map(|r| r.sequence()).collect();
        sequences.sort_unstable();
        sequences.dedup();
        assert_eq!(sequences.len(), state.sent.len(), "sequence reused across retries");
        assert_eq!(session.read_retries() as usize, state.sent.len() - 1);
    }

    #[test]
    fn sequence_increments_per_request_and_wraps() {
        let (session, state) = session_with(Box::new(|request| {
            vec![read_reply(
                request.sequence(),
                ResponseCode::Success,
                request.address(),
                1,
            )]
        }));
        session.read_uint32(0x0).unwrap();
        session.read_uint32(0x0).unwrap();
        {
            let state = state.lock().unwrap();
            assert_eq!(state.sent[0].sequence(), INITIAL_SEQUENCE);
            assert_eq!(state.sent[1].sequence(), INITIAL_SEQUENCE + 1);
        }

        session.resync_sequence(0xFFFF);
        session.read_uint32(0x0).unwrap();
        session.read_uint32(0x0).unwrap();
        let state = state.lock().unwrap();
        assert_eq!(state.sent[2].sequence(), 0xFFFF);
        assert_eq!(state.sent[3].sequence(), 0x0000);
    }

    #[test]
    fn unaligned_address_is_rejected_before_io() {
        let (session, state) = session_with(Box::new(|_| Vec::new()));
        assert!(matches!(
            session.read_uint32(0x3),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(matches!(
            session.write_uint32(0x5, 1),
            Err(SessionError::InvalidArgument(_))
        ));
        assert!(state.lock().unwrap().sent.is_empty());
    }

    #[test]
    fn operations_on_closed_session_fail_not_connected() {
        let session = ControlSession::new(SessionConfig {
            peer_ip: "192.168.0.2".to_string(),
            control_port: 8192,
            serial_number: "serial".to_string(),
            sequence_check: false,
        });
        assert!(matches!(
            session.read_uint32(0x4),
            Err(SessionError::NotConnected)
        ));

        let (session, _) = session_with(Box::new(|_| Vec::new()));
        session.close();
        assert!(!session.is_connected());
        assert!(matches!(
            session.write_uint32(0x4, 1),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn acked_write_returns_true() {
        let (session, _) = session_with(Box::new(|request| vec![write_ack(request.sequence())]));
        assert!(session.write_uint32(0x8, 0x3).unwrap());
    }

    #[test]
    fn no_ack_write_swallows_silence() {
        let (session, state) = session_with(Box::new(|_| Vec::new()));
        let timeout = Timeout::new(Duration::from_millis(20), Duration::from_millis(5));
        // reset trigger path: one attempt, missing ack is not an error
        let acked = session
            .write_uint32_with(0x4, 0x8, &timeout, false, false)
            .unwrap();
        assert!(!acked);
        assert_eq!(state.lock().unwrap().sent.len(), 1);
        assert_eq!(session.write_retries(), 0);
    }

    #[test]
    fn retried_write_times_out_after_deadline() {
        let (session, state) = session_with(Box::new(|_| Vec::new()));
        let timeout = Timeout::new(Duration::from_millis(30), Duration::from_millis(5));
        let err = session
            .write_uint32_with(0xC, 1, &timeout, true, false)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Timeout {
                operation: "write_uint32",
                address: 0xC,
            }
        ));
        assert!(state.lock().unwrap().sent.len() >= 2);
        assert!(session.write_retries() >= 1);
    }

    #[test]
    fn write_rejection_is_not_retried() {
        let (session, state) = session_with(Box::new(|request| {
            vec![encode_reply(&ControlReply {
                cmd_code: WR_DWORD,
                flags: 0,
                sequence: request.sequence(),
                response_code: ResponseCode::SequenceCheckFail,
                payload: None,
            })]
        }));
        let err = session.write_uint32(0x8, 1).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Protocol {
                code: ResponseCode::SequenceCheckFail,
                ..
            }
        ));
        assert_eq!(state.lock().unwrap().sent.len(), 1);
    }

    #[test]
    fn read_reply_address_mismatch_is_an_error() {
        let (session, _) = session_with(Box::new(|request| {
            vec![read_reply(
                request.sequence(),
                ResponseCode::Success,
                request.address() + 4,
                0,
            )]
        }));
        assert!(matches!(
            session.read_uint32(0x4),
            Err(SessionError::AddressMismatch {
                expected: 0x4,
                actual: 0x8,
            })
        ));
    }
}
