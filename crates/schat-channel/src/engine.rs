//! Secure UDP datagram engine
//!
//! Implements `SecureChannel` over a single UDP socket. A receive task turns
//! incoming frames into `ChannelEvents` calls; a keepalive task refreshes
//! established sessions and expires silent ones.
//!
//! Every session is directional. The side that sent SESSION_REQUEST encrypts
//! with it (outbound); the side that answered decrypts with it (inbound).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::io;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use hashbrown::HashMap;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use x25519_dalek::EphemeralSecret;

use schat_core::{
    AlgorithmInfo, Certificate, ChannelEvents, ChannelNumber, CipherAlgorithm, DigestAlgorithm, Endpoint,
    GreetOutcome, OperationError, OperationResult, SecureChannel, SendResults,
};

use crate::config::ChannelConfig;
use crate::crypto::{
    derive_session_key, generate_ephemeral, negotiate_cipher, request_transcript, response_transcript, SessionCipher,
};
use crate::error::{ChannelError, Result};
use crate::frame::{Frame, SessionNumber};
use crate::identity::{Identity, IdentityKeyPair};

/// Pause after a receive error that is likely to repeat
const RECEIVE_BACKOFF: Duration = Duration::from_millis(50);

/// Per-datagram errors retry at once; anything else waits `RECEIVE_BACKOFF`
fn receive_backoff(error: &io::Error) -> Option<Duration> {
    match error.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionRefused => None,
        _ => Some(RECEIVE_BACKOFF),
    }
}

// ----------------------------------------------------------------------------
// Peer bookkeeping
// ----------------------------------------------------------------------------

/// Our SESSION_REQUEST waiting for its SESSION
struct PendingRequest {
    session_number: SessionNumber,
    secret: EphemeralSecret,
    public: [u8; 32],
}

/// A peer's SESSION_REQUEST as received
struct InboundRequest {
    session_number: SessionNumber,
    ciphers: Vec<CipherAlgorithm>,
    digest: DigestAlgorithm,
    ephemeral: [u8; 32],
    signature: Vec<u8>,
}

/// One direction of an established session
struct DirectedSession {
    session_number: SessionNumber,
    cipher: SessionCipher,
    /// Next sequence to send (outbound) or highest accepted (inbound)
    sequence: u64,
}

struct Peer {
    certificate: Option<Certificate>,
    requested: Option<PendingRequest>,
    /// Request that arrived before the peer's presentation
    deferred: Option<InboundRequest>,
    outbound: Option<DirectedSession>,
    inbound: Option<DirectedSession>,
    last_inbound: Instant,
}

impl Peer {
    fn new() -> Self {
        Self {
            certificate: None,
            requested: None,
            deferred: None,
            outbound: None,
            inbound: None,
            last_inbound: Instant::now(),
        }
    }

    fn has_session(&self) -> bool {
        self.outbound.is_some() || self.inbound.is_some()
    }
}

#[derive(Default)]
struct EngineState {
    pending_greets: HashMap<u64, (Endpoint, oneshot::Sender<OperationResult>)>,
    peers: HashMap<Endpoint, Peer>,
}

impl EngineState {
    fn peer(&mut self, endpoint: Endpoint) -> &mut Peer {
        self.peers.entry(endpoint).or_insert_with(Peer::new)
    }
}

fn data_aad(session_number: SessionNumber, channel: ChannelNumber) -> [u8; 5] {
    let mut aad = [0u8; 5];
    aad[..4].copy_from_slice(&session_number.to_le_bytes());
    aad[4] = channel;
    aad
}

fn keepalive_aad(session_number: SessionNumber) -> [u8; 4] {
    session_number.to_le_bytes()
}

// ----------------------------------------------------------------------------
// Engine
// ----------------------------------------------------------------------------

/// Secure channel over one UDP socket
pub struct DatagramEngine {
    socket: UdpSocket,
    identity: Identity,
    digest: DigestAlgorithm,
    config: ChannelConfig,
    hooks: RwLock<Option<Arc<dyn ChannelEvents>>>,
    ciphers: RwLock<Vec<CipherAlgorithm>>,
    state: Mutex<EngineState>,
    closed: AtomicBool,
    next_unique: AtomicU64,
    next_session: AtomicU32,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DatagramEngine {
    /// Bind `listen` and start the receive and keepalive tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn open(
        listen: SocketAddr,
        identity: Identity,
        digest: DigestAlgorithm,
        config: ChannelConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let socket = UdpSocket::bind(listen).await?;
        info!("Secure channel listening on {}", socket.local_addr()?);

        let engine = Arc::new(Self {
            socket,
            identity,
            digest,
            config,
            hooks: RwLock::new(None),
            ciphers: RwLock::new(CipherAlgorithm::ALL.to_vec()),
            state: Mutex::new(EngineState::default()),
            closed: AtomicBool::new(false),
            next_unique: AtomicU64::new(rand_core::RngCore::next_u64(&mut rand_core::OsRng)),
            next_session: AtomicU32::new(1),
            tasks: Mutex::new(Vec::new()),
        });

        let receiver = tokio::spawn(engine.clone().receive_loop());
        let keepalive = tokio::spawn(engine.clone().keepalive_loop());
        engine.tasks().extend([receiver, keepalive]);
        Ok(engine)
    }

    /// Register the event hooks. Events before registration use default decisions.
    pub fn set_event_hooks(&self, hooks: Arc<dyn ChannelEvents>) {
        *self.hooks.write().unwrap_or_else(PoisonError::into_inner) = Some(hooks);
    }

    /// Ciphers offered and accepted, in preference order. An empty list is ignored.
    pub fn set_cipher_capabilities(&self, ciphers: Vec<CipherAlgorithm>) {
        if ciphers.is_empty() {
            warn!("Ignoring empty cipher capability list");
            return;
        }
        *self.ciphers.write().unwrap_or_else(PoisonError::into_inner) = ciphers;
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn certificate(&self) -> &Certificate {
        self.identity.certificate()
    }

    /// Peers we can currently send to
    pub fn established_peers(&self) -> Vec<Endpoint> {
        let mut peers: Vec<Endpoint> = self
            .state()
            .peers
            .iter()
            .filter(|(_, peer)| peer.outbound.is_some())
            .map(|(endpoint, _)| *endpoint)
            .collect();
        peers.sort();
        peers
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn hooks(&self) -> Option<Arc<dyn ChannelEvents>> {
        self.hooks.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn cipher_capabilities(&self) -> Vec<CipherAlgorithm> {
        self.ciphers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn preferred_cipher(&self) -> CipherAlgorithm {
        self.cipher_capabilities()
            .first()
            .copied()
            .unwrap_or(CipherAlgorithm::ChaCha20Poly1305)
    }

    async fn send_frame(&self, to: Endpoint, frame: &Frame) -> Result<()> {
        let bytes = frame.encode()?;
        self.send_bytes(to, &bytes).await
    }

    async fn send_bytes(&self, to: Endpoint, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.config.max_datagram_size {
            return Err(ChannelError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("datagram of {} bytes exceeds the limit", bytes.len()),
            )));
        }
        self.socket.send_to(bytes, to.addr()).await?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Background tasks
    // ------------------------------------------------------------------------

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; self.config.max_datagram_size];
        while !self.is_closed() {
            let (len, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    match receive_backoff(&e) {
                        None => debug!("Receive failed: {}", e),
                        Some(delay) => {
                            warn!("Receive failed: {}; retrying in {:?}", e, delay);
                            tokio::time::sleep(delay).await;
                        }
                    }
                    continue;
                }
            };
            match Frame::decode(&buf[..len]) {
                Ok(frame) => {
                    trace!("{} from {}", frame.name(), from);
                    self.handle_frame(Endpoint::from(from), frame).await;
                }
                Err(e) => debug!("Dropping undecodable datagram from {}: {}", from, e),
            }
        }
    }

    async fn keepalive_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.keepalive_period());
        ticker.tick().await;
        while !self.is_closed() {
            ticker.tick().await;
            self.send_keepalives().await;
            self.expire_sessions();
        }
    }

    async fn send_keepalives(&self) {
        let frames: Vec<(Endpoint, Result<Frame>)> = {
            let mut state = self.state();
            state
                .peers
                .iter_mut()
                .filter_map(|(endpoint, peer)| {
                    let session = peer.outbound.as_mut()?;
                    session.sequence += 1;
                    let sequence = session.sequence;
                    let frame = session
                        .cipher
                        .encrypt(sequence, &keepalive_aad(session.session_number), &[])
                        .map(|ciphertext| Frame::KeepAlive {
                            session_number: session.session_number,
                            sequence,
                            ciphertext,
                        });
                    Some((*endpoint, frame))
                })
                .collect()
        };

        for (endpoint, frame) in frames {
            let sent = match frame {
                Ok(frame) => self.send_frame(endpoint, &frame).await,
                Err(e) => Err(e),
            };
            if let Err(e) = sent {
                debug!("Keepalive to {} failed: {}", endpoint, e);
            }
        }
    }

    fn expire_sessions(&self) {
        let timeout = self.config.session_timeout();
        let lost: Vec<Endpoint> = {
            let mut state = self.state();
            state
                .peers
                .iter_mut()
                .filter(|(_, peer)| peer.has_session() && peer.last_inbound.elapsed() > timeout)
                .filter_map(|(endpoint, peer)| {
                    let had_outbound = peer.outbound.take().is_some();
                    peer.inbound = None;
                    peer.requested = None;
                    info!("Session with {} timed out", endpoint);
                    had_outbound.then_some(*endpoint)
                })
                .collect()
        };

        if let Some(hooks) = self.hooks() {
            for endpoint in lost {
                hooks.on_session_lost(endpoint);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Frame handling
    // ------------------------------------------------------------------------

    async fn handle_frame(&self, from: Endpoint, frame: Frame) {
        match frame {
            Frame::HelloRequest { unique } => {
                let accept = self.hooks().map_or(true, |hooks| hooks.on_hello(from, true));
                if accept {
                    if let Err(e) = self.send_frame(from, &Frame::HelloResponse { unique }).await {
                        debug!("HELLO response to {} failed: {}", from, e);
                    }
                }
            }
            Frame::HelloResponse { unique } => {
                let pending = {
                    let mut state = self.state();
                    let expected = state
                        .pending_greets
                        .get(&unique)
                        .map_or(false, |(target, _)| *target == from);
                    if expected {
                        state.pending_greets.remove(&unique)
                    } else {
                        None
                    }
                };
                match pending {
                    Some((_, reply)) => {
                        let _ = reply.send(Ok(()));
                    }
                    None => debug!("Unexpected HELLO response from {}", from),
                }
            }
            Frame::Presentation { subject, public_key } => {
                self.handle_presentation(from, Certificate::new(subject, public_key)).await;
            }
            Frame::SessionRequest {
                session_number,
                ciphers,
                digest,
                ephemeral,
                signature,
            } => {
                let request = InboundRequest {
                    session_number,
                    ciphers,
                    digest,
                    ephemeral,
                    signature,
                };
                let request = {
                    let mut state = self.state();
                    let peer = state.peer(from);
                    if peer.certificate.is_none() {
                        debug!("Deferring SESSION_REQUEST from {} until its presentation", from);
                        peer.deferred = Some(request);
                        None
                    } else {
                        Some(request)
                    }
                };
                if let Some(request) = request {
                    self.answer_request(from, request).await;
                }
            }
            Frame::Session {
                session_number,
                cipher,
                digest,
                ephemeral,
                signature,
            } => {
                self.complete_request(from, session_number, cipher, digest, ephemeral, signature);
            }
            Frame::Data {
                session_number,
                sequence,
                channel,
                ciphertext,
            } => {
                let aad = data_aad(session_number, channel);
                if let Some(plaintext) = self.open_inbound(from, session_number, sequence, &aad, &ciphertext) {
                    if let Some(hooks) = self.hooks() {
                        hooks.on_data(from, channel, &plaintext);
                    }
                }
            }
            Frame::KeepAlive {
                session_number,
                sequence,
                ciphertext,
            } => {
                let aad = keepalive_aad(session_number);
                let _ = self.open_inbound(from, session_number, sequence, &aad, &ciphertext);
            }
        }
    }

    async fn handle_presentation(&self, from: Endpoint, certificate: Certificate) {
        // Stored before the hook runs: the hook may chain a session request
        let previous = self.state().peer(from).certificate.replace(certificate.clone());
        let is_new = previous.as_ref() != Some(&certificate);
        let accept = self
            .hooks()
            .map_or(true, |hooks| hooks.on_presentation(from, &certificate, is_new));
        if !accept {
            debug!("Presentation from {} rejected", from);
            self.state().peer(from).certificate = previous;
            return;
        }

        let deferred = self.state().peer(from).deferred.take();
        if let Some(request) = deferred {
            self.answer_request(from, request).await;
        }
    }

    /// Respond to a peer's SESSION_REQUEST, installing our inbound session
    async fn answer_request(&self, from: Endpoint, request: InboundRequest) {
        let ours = self.cipher_capabilities();
        let remote = AlgorithmInfo::new(
            request.ciphers.first().copied().unwrap_or_else(|| self.preferred_cipher()),
            request.digest,
        );
        let local = AlgorithmInfo::new(self.preferred_cipher(), self.digest);

        let hooks = self.hooks();
        let accept = hooks
            .as_ref()
            .map_or(true, |hooks| hooks.on_session_request(from, &request.ciphers, true));
        if !accept {
            debug!("SESSION_REQUEST from {} rejected", from);
            return;
        }

        let fail = |local: AlgorithmInfo, remote: AlgorithmInfo, reason: &str| {
            warn!("Session with {} failed: {}", from, reason);
            if let Some(hooks) = &hooks {
                hooks.on_session_failed(from, true, &local, &remote);
            }
        };

        let public_key = self.state().peer(from).certificate.as_ref().map(|c| c.public_key);
        let Some(public_key) = public_key else {
            return fail(local, remote, "no presentation");
        };
        let transcript = request_transcript(request.session_number, &request.ephemeral);
        if IdentityKeyPair::verify(&public_key, &transcript, &request.signature).is_err() {
            return fail(local, remote, "invalid request signature");
        }
        let Some(cipher) = negotiate_cipher(&ours, &request.ciphers) else {
            return fail(local, remote, "no common cipher");
        };

        let (secret, public) = generate_ephemeral();
        let session = derive_session_key(
            request.digest,
            secret,
            &request.ephemeral,
            &request.ephemeral,
            &public,
            request.session_number,
        )
        .and_then(|key| SessionCipher::new(cipher, &key));
        let session = match session {
            Ok(session) => session,
            Err(e) => return fail(local, remote, &e.to_string()),
        };

        let signature = self
            .identity
            .keypair()
            .sign(response_transcript(request.session_number, &request.ephemeral, &public));
        {
            let mut state = self.state();
            let peer = state.peer(from);
            peer.inbound = Some(DirectedSession {
                session_number: request.session_number,
                cipher: session,
                sequence: 0,
            });
            peer.last_inbound = Instant::now();
        }

        let reply = Frame::Session {
            session_number: request.session_number,
            cipher,
            digest: self.digest,
            ephemeral: public,
            signature: signature.to_vec(),
        };
        if let Err(e) = self.send_frame(from, &reply).await {
            debug!("SESSION to {} failed: {}", from, e);
        }
    }

    /// Finish our own request, installing the outbound session
    fn complete_request(
        &self,
        from: Endpoint,
        session_number: SessionNumber,
        cipher: CipherAlgorithm,
        digest: DigestAlgorithm,
        ephemeral: [u8; 32],
        signature: Vec<u8>,
    ) {
        let (pending, public_key) = {
            let mut state = self.state();
            let peer = state.peer(from);
            let expected = peer
                .requested
                .as_ref()
                .map_or(false, |pending| pending.session_number == session_number);
            if expected {
                (peer.requested.take(), peer.certificate.as_ref().map(|c| c.public_key))
            } else {
                (None, None)
            }
        };
        let (Some(pending), Some(public_key)) = (pending, public_key) else {
            debug!("Unexpected SESSION {} from {}", session_number, from);
            return;
        };

        let local = AlgorithmInfo::new(cipher, self.digest);
        let remote = AlgorithmInfo::new(cipher, digest);
        let hooks = self.hooks();
        let offered = self.cipher_capabilities().contains(&cipher);
        let accept = hooks.as_ref().map_or(offered, |hooks| hooks.on_session(from, cipher, offered));

        let fail = |reason: &str| {
            warn!("Session with {} failed: {}", from, reason);
            if let Some(hooks) = &hooks {
                hooks.on_session_failed(from, true, &local, &remote);
            }
        };

        if !accept {
            return fail("cipher rejected");
        }
        let transcript = response_transcript(session_number, &pending.public, &ephemeral);
        if IdentityKeyPair::verify(&public_key, &transcript, &signature).is_err() {
            return fail("invalid session signature");
        }
        let session = derive_session_key(
            self.digest,
            pending.secret,
            &ephemeral,
            &pending.public,
            &ephemeral,
            session_number,
        )
        .and_then(|key| SessionCipher::new(cipher, &key));
        let session = match session {
            Ok(session) => session,
            Err(e) => return fail(&e.to_string()),
        };

        let is_new = {
            let mut state = self.state();
            let peer = state.peer(from);
            let is_new = peer.outbound.is_none();
            peer.outbound = Some(DirectedSession {
                session_number,
                cipher: session,
                sequence: 0,
            });
            peer.last_inbound = Instant::now();
            is_new
        };
        info!("Session {} with {} established ({})", session_number, from, cipher);
        if let Some(hooks) = &hooks {
            hooks.on_session_established(from, is_new, &local, &remote);
        }
    }

    /// Authenticate and decrypt a payload on the inbound session
    fn open_inbound(
        &self,
        from: Endpoint,
        session_number: SessionNumber,
        sequence: u64,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Option<Vec<u8>> {
        let mut state = self.state();
        let peer = state.peers.get_mut(&from)?;
        let session = match peer.inbound.as_mut() {
            Some(session) if session.session_number == session_number => session,
            _ => {
                debug!("No inbound session {} with {}", session_number, from);
                return None;
            }
        };
        if sequence <= session.sequence {
            debug!("Replayed sequence {} from {}", sequence, from);
            return None;
        }
        match session.cipher.decrypt(sequence, aad, ciphertext) {
            Ok(plaintext) => {
                session.sequence = sequence;
                peer.last_inbound = Instant::now();
                Some(plaintext)
            }
            Err(e) => {
                debug!("Dropping payload from {}: {}", from, e);
                None
            }
        }
    }

    fn fail_pending_greets(&self) {
        let pending: Vec<_> = self.state().pending_greets.drain().collect();
        for (_, (_, reply)) in pending {
            let _ = reply.send(Err(OperationError::Closed));
        }
    }
}

// ----------------------------------------------------------------------------
// SecureChannel
// ----------------------------------------------------------------------------

#[async_trait]
impl SecureChannel for DatagramEngine {
    async fn greet(&self, target: Endpoint) -> GreetOutcome {
        let started = Instant::now();
        let outcome = |result| GreetOutcome {
            result,
            elapsed: started.elapsed(),
        };
        if self.is_closed() {
            return outcome(Err(OperationError::Closed));
        }

        let unique = self.next_unique.fetch_add(1, Ordering::Relaxed);
        let (reply, response) = oneshot::channel();
        self.state().pending_greets.insert(unique, (target, reply));

        if let Err(e) = self.send_frame(target, &Frame::HelloRequest { unique }).await {
            self.state().pending_greets.remove(&unique);
            return outcome(Err(e.into()));
        }

        match tokio::time::timeout(self.config.hello_timeout(), response).await {
            Ok(Ok(result)) => outcome(result),
            Ok(Err(_)) => outcome(Err(OperationError::Closed)),
            Err(_) => {
                self.state().pending_greets.remove(&unique);
                outcome(Err(OperationError::Timeout))
            }
        }
    }

    async fn introduce_to(&self, target: Endpoint) -> OperationResult {
        if self.is_closed() {
            return Err(OperationError::Closed);
        }
        let certificate = self.identity.certificate();
        let frame = Frame::Presentation {
            subject: certificate.subject.clone(),
            public_key: certificate.public_key,
        };
        Ok(self.send_frame(target, &frame).await?)
    }

    async fn request_session(&self, target: Endpoint) -> OperationResult {
        if self.is_closed() {
            return Err(OperationError::Closed);
        }

        let session_number = self.next_session.fetch_add(1, Ordering::Relaxed);
        let (secret, public) = generate_ephemeral();
        let signature = self
            .identity
            .keypair()
            .sign(request_transcript(session_number, &public));
        {
            let mut state = self.state();
            let peer = state.peer(target);
            if peer.certificate.is_none() {
                return Err(OperationError::NoPresentation);
            }
            peer.requested = Some(PendingRequest {
                session_number,
                secret,
                public,
            });
        }

        let frame = Frame::SessionRequest {
            session_number,
            ciphers: self.cipher_capabilities(),
            digest: self.digest,
            ephemeral: public,
            signature: signature.to_vec(),
        };
        Ok(self.send_frame(target, &frame).await?)
    }

    async fn send_data_to_all(&self, channel: ChannelNumber, data: Vec<u8>) -> SendResults {
        let closed = self.is_closed();
        let sealed: Vec<(Endpoint, core::result::Result<Frame, OperationError>)> = {
            let mut state = self.state();
            state
                .peers
                .iter_mut()
                .filter_map(|(endpoint, peer)| {
                    let session = peer.outbound.as_mut()?;
                    if closed {
                        return Some((*endpoint, Err(OperationError::Closed)));
                    }
                    session.sequence += 1;
                    let sequence = session.sequence;
                    let frame = session
                        .cipher
                        .encrypt(sequence, &data_aad(session.session_number, channel), &data)
                        .map(|ciphertext| Frame::Data {
                            session_number: session.session_number,
                            sequence,
                            channel,
                            ciphertext,
                        })
                        .map_err(OperationError::from);
                    Some((*endpoint, frame))
                })
                .collect()
        };

        let mut results = SendResults::new();
        for (endpoint, frame) in sealed {
            let result = match frame {
                Ok(frame) => self.send_frame(endpoint, &frame).await.map_err(OperationError::from),
                Err(e) => Err(e),
            };
            results.insert(endpoint, result);
        }
        results
    }

    fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        for task in self.tasks().drain(..) {
            task.abort();
        }
        self.fail_pending_greets();
        info!("Secure channel closed");
        true
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl core::fmt::Debug for DatagramEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DatagramEngine")
            .field("subject", &self.identity.certificate().subject)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
