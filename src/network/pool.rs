// src/network/pool.rs
//! Mining pool client
//!
//! Plain TCP with `TCP_NODELAY`; messages are UTF-8 JSON objects
//! terminated by a single `\n`. One listener loop consumes the socket
//! with a 1 s poll; share submission is a synchronous request/response
//! round-trip that holds the socket mutex across its write and read, so
//! submits never interleave with the listener's reads. Job notification
//! lines consumed while a submit holds the socket are parked in a
//! backlog the listener dispatches on its next cycle rather than lost.
//!
//! On any I/O error or timeout after login the connection is dropped,
//! the client sleeps 5 s and reconnects + relogs. In-flight submits on a
//! dropped connection fail their attempt and are retried (or counted as
//! rejected) by the calling worker.

use crate::job::{EpochPreparer, Job, JobParams, JobRegistry, Share, ALGO};
use crate::utils::error::MinerError;
use serde_json::{json, Value};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Read timeout for a request/response round-trip (login, submit).
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll timeout of the job-listen loop.
const LISTEN_POLL: Duration = Duration::from_secs(1);

/// Backoff between reconnection attempts.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Connect timeout per resolved address.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for connecting to a mining pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool hostname or address.
    pub host: String,
    /// Pool port.
    pub port: u16,
    /// Wallet address used as the login.
    pub wallet: String,
    /// Pool password (often just "x").
    pub password: String,
    /// Worker identifier.
    pub worker: String,
    /// User agent string sent at login.
    pub agent: String,
}

/// A connected socket plus the carry-over buffer for partial lines.
struct Connection {
    stream: TcpStream,
    pending: Vec<u8>,
}

impl Connection {
    /// Resolves the pool address and connects to the first candidate
    /// that answers, with `TCP_NODELAY` set.
    fn open(host: &str, port: u16) -> Result<Self, MinerError> {
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| MinerError::Config(format!("cannot resolve {}:{}: {}", host, port, e)))?;

        let mut last_err: Option<std::io::Error> = None;
        for addr in addrs {
            log::debug!("connecting to {}", addr);
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    log::info!("connected to pool {}:{}", host, port);
                    return Ok(Connection {
                        stream,
                        pending: Vec::new(),
                    });
                }
                Err(e) => {
                    log::warn!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        match last_err {
            Some(e) => Err(e.into()),
            None => Err(MinerError::Config(format!(
                "{}:{} resolved to no addresses",
                host, port
            ))),
        }
    }

    fn send_line(&mut self, line: &str) -> Result<(), MinerError> {
        self.stream.write_all(line.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()?;
        Ok(())
    }

    /// Reads one complete line, waiting at most `timeout` per socket
    /// read. Returns `Ok(None)` on timeout; incomplete trailing bytes
    /// stay buffered for the next call. EOF is a transport error.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, MinerError> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }

            self.stream.set_read_timeout(Some(timeout))?;
            let mut buf = [0u8; 4096];
            match self.stream.read(&mut buf) {
                Ok(0) => {
                    return Err(MinerError::Transport(std::io::Error::new(
                        std::io::ErrorKind::ConnectionAborted,
                        "connection closed by pool",
                    )))
                }
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Client for communicating with a mining pool.
///
/// Owns the socket, drives login and the job-listen loop, and exposes
/// the synchronous [`submit`](Self::submit) used by the workers.
pub struct PoolClient {
    config: PoolConfig,
    /// Socket mutex; held for one poll read by the listener, or across
    /// a whole request/response round-trip by a submitter.
    conn: Mutex<Option<Connection>>,
    /// Serializes submitters ahead of the socket mutex.
    submit_gate: Mutex<()>,
    session_id: Mutex<Option<String>>,
    /// JSON-RPC request ids; login is always 1.
    rpc_id: AtomicU64,
    registry: Arc<JobRegistry>,
    preparer: Arc<dyn EpochPreparer>,
    stop: Arc<AtomicBool>,
    /// Set when an unrecoverable error (RandomX init) was hit; the
    /// process should exit non-zero.
    fatal: AtomicBool,
    /// Notification lines consumed off the socket by a submit
    /// round-trip. Only the listener thread dispatches these: a job
    /// publish can rebuild the dataset, which must never run on a
    /// worker thread that is itself holding a VM.
    backlog: Mutex<Vec<String>>,
}

impl PoolClient {
    /// Creates a disconnected client; call
    /// [`connect_and_login`](Self::connect_and_login) to establish the
    /// session.
    pub fn new(
        config: PoolConfig,
        registry: Arc<JobRegistry>,
        preparer: Arc<dyn EpochPreparer>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        PoolClient {
            config,
            conn: Mutex::new(None),
            submit_gate: Mutex::new(()),
            session_id: Mutex::new(None),
            rpc_id: AtomicU64::new(2),
            registry,
            preparer,
            stop,
            fatal: AtomicBool::new(false),
            backlog: Mutex::new(Vec::new()),
        }
    }

    /// True when the client hit an unrecoverable error.
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    /// Connects and logs in. The login response carries the session id
    /// and the first job, which is published (building the first
    /// dataset) before this returns.
    pub fn connect_and_login(&self) -> Result<(), MinerError> {
        let mut conn = Connection::open(&self.config.host, self.config.port)?;

        let request = json!({
            "id": 1,
            "jsonrpc": "2.0",
            "method": "login",
            "params": {
                "login": self.config.wallet,
                "pass": self.config.password,
                "agent": self.config.agent,
                "worker": self.config.worker,
            }
        });
        log::info!("logging in as worker {}", self.config.worker);
        log::debug!("login request: {}", request);
        conn.send_line(&request.to_string())?;

        // Notifications may interleave before the response shows up;
        // they are replayed once the session is established.
        let mut deferred = Vec::new();
        let response = self.await_response(&mut conn, 1, &mut deferred)?;

        let result = response
            .get("result")
            .filter(|r| r.is_object())
            .ok_or_else(|| {
                MinerError::Protocol(format!("login rejected: {}", error_message(&response)))
            })?;

        let session = match result.get("id").and_then(Value::as_str) {
            Some(id) => id.to_string(),
            None => {
                log::warn!("no session id in login response, using \"1\"");
                "1".to_string()
            }
        };
        log::info!("pool session id: {}", session);
        *self.session_id.lock().unwrap() = Some(session);

        let job_value = result
            .get("job")
            .cloned()
            .ok_or_else(|| MinerError::Protocol("no job in login response".into()))?;
        let params: JobParams = serde_json::from_value(job_value)?;
        self.registry
            .publish(Job::from_params(params)?, self.preparer.as_ref())?;

        *self.conn.lock().unwrap() = Some(conn);

        self.backlog.lock().unwrap().extend(deferred);
        Ok(())
    }

    /// Job listener loop: polls the socket for server-initiated
    /// notifications and reconnects (with backoff) whenever the
    /// connection drops. Returns when shutdown is requested or a fatal
    /// error is recorded.
    pub fn run(&self) {
        while !self.stop.load(Ordering::Relaxed) && !self.is_fatal() {
            if self.conn.lock().unwrap().is_none() {
                log::warn!("pool connection lost, reconnecting...");
                match self.connect_and_login() {
                    Ok(()) => log::info!("reconnected to pool"),
                    Err(e @ MinerError::Init(_)) => {
                        self.record_fatal(&e);
                        return;
                    }
                    Err(e) => {
                        log::warn!("reconnect failed: {}", e);
                        self.backoff();
                        continue;
                    }
                }
            }

            // Lines parked by submits (or by login) go first.
            match self.drain_backlog() {
                Ok(()) => {}
                Err(e @ MinerError::Init(_)) => {
                    self.record_fatal(&e);
                    return;
                }
                Err(e) => {
                    log::warn!("dropping connection after protocol error: {}", e);
                    *self.conn.lock().unwrap() = None;
                    self.backoff();
                    continue;
                }
            }

            let line = {
                let mut guard = self.conn.lock().unwrap();
                let Some(conn) = guard.as_mut() else { continue };
                match conn.read_line(LISTEN_POLL) {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("pool read failed: {}", e);
                        *guard = None;
                        drop(guard);
                        self.backoff();
                        continue;
                    }
                }
            };

            // Dispatch outside the socket mutex: a seed-hash change
            // rebuilds the dataset for tens of seconds and submitters
            // must not queue behind that.
            if let Some(line) = line {
                match self.dispatch(&line) {
                    Ok(()) => {}
                    Err(e @ MinerError::Init(_)) => {
                        self.record_fatal(&e);
                        return;
                    }
                    Err(e) => {
                        log::warn!("dropping connection after protocol error: {}", e);
                        *self.conn.lock().unwrap() = None;
                        self.backoff();
                    }
                }
            }
        }
    }

    /// Dispatches every line parked in the backlog. Listener thread
    /// only.
    fn drain_backlog(&self) -> Result<(), MinerError> {
        let queued = std::mem::take(&mut *self.backlog.lock().unwrap());
        for line in queued {
            self.dispatch(&line)?;
        }
        Ok(())
    }

    /// Submits a share and waits for the pool's verdict.
    ///
    /// Returns `Ok(true)` when the pool answered `{"status":"OK"}`,
    /// `Ok(false)` on any other response shape, and `Err` on transport
    /// failure (which also drops the connection so the listener
    /// reconnects). Retry policy lives in the worker.
    pub fn submit(&self, share: &Share) -> Result<bool, MinerError> {
        let _gate = self.submit_gate.lock().unwrap();

        let session = self
            .session_id
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| MinerError::Protocol("not logged in".into()))?;

        let id = self.rpc_id.fetch_add(1, Ordering::Relaxed);
        let request = json!({
            "id": id,
            "jsonrpc": "2.0",
            "method": "submit",
            "params": {
                "id": session,
                "job_id": share.job_id,
                "nonce": share.nonce_hex(),
                "result": share.hash_hex(),
                "algo": ALGO,
            }
        });
        log::debug!("submitting share: {}", request);

        let mut deferred = Vec::new();
        let outcome = {
            let mut guard = self.conn.lock().unwrap();
            let conn = guard.as_mut().ok_or_else(|| {
                MinerError::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "not connected to pool",
                ))
            })?;

            let round_trip = conn
                .send_line(&request.to_string())
                .and_then(|()| self.await_response(conn, id, &mut deferred));
            match round_trip {
                Ok(response) => Ok(submit_accepted(&response)),
                Err(e) => {
                    // The socket is in an unknown state; force the
                    // listener through the reconnect path.
                    *guard = None;
                    Err(e)
                }
            }
        };

        if !deferred.is_empty() {
            self.backlog.lock().unwrap().extend(deferred);
        }

        outcome
    }

    /// Closes the socket; subsequent submits fail fast.
    pub fn close(&self) {
        *self.conn.lock().unwrap() = None;
    }

    /// Reads lines until the response for `id` arrives or the 10 s
    /// response timeout expires. Notification lines are pushed to
    /// `deferred`; unparsable lines are discarded.
    fn await_response(
        &self,
        conn: &mut Connection,
        id: u64,
        deferred: &mut Vec<String>,
    ) -> Result<Value, MinerError> {
        let deadline = Instant::now() + RESPONSE_TIMEOUT;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(MinerError::Transport(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "timed out waiting for pool response",
                )));
            }

            let Some(line) = conn.read_line(remaining)? else {
                continue;
            };
            let value: Value = match serde_json::from_str(&line) {
                Ok(v) => v,
                Err(_) => {
                    log::debug!("discarding unparsable line from pool");
                    continue;
                }
            };

            if value.get("method").is_some() {
                deferred.push(line);
                continue;
            }

            match value.get("id").and_then(Value::as_u64) {
                Some(resp_id) if resp_id != id => {
                    log::warn!("response for unexpected request id {}", resp_id);
                }
                _ => return Ok(value),
            }
        }
    }

    /// Handles one server-initiated line: `job` notifications feed the
    /// registry, unknown methods are logged, non-JSON is discarded.
    fn dispatch(&self, line: &str) -> Result<(), MinerError> {
        let value: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(_) => {
                log::debug!("discarding unparsable line from pool");
                return Ok(());
            }
        };

        match value.get("method").and_then(Value::as_str) {
            Some("job") => {
                let params = value
                    .get("params")
                    .cloned()
                    .ok_or_else(|| MinerError::Protocol("job notification without params".into()))?;
                let params: JobParams = serde_json::from_value(params)
                    .map_err(|e| MinerError::Protocol(format!("bad job params: {}", e)))?;
                let job = Job::from_params(params)?;
                self.registry.publish(job, self.preparer.as_ref())?;
                Ok(())
            }
            Some(method) => {
                log::warn!("unknown method from pool: {}", method);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn record_fatal(&self, e: &MinerError) {
        log::error!("unrecoverable error: {}", e);
        self.fatal.store(true, Ordering::Release);
        self.stop.store(true, Ordering::Release);
        self.registry.shutdown();
    }

    /// Sleeps the reconnect backoff in small slices so shutdown stays
    /// responsive.
    fn backoff(&self) {
        let deadline = Instant::now() + RECONNECT_BACKOFF;
        while Instant::now() < deadline && !self.stop.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

fn submit_accepted(response: &Value) -> bool {
    let accepted = response
        .get("result")
        .and_then(|r| r.get("status"))
        .and_then(Value::as_str)
        == Some("OK");
    if !accepted {
        log::debug!("share rejected: {}", error_message(response));
    }
    accepted
}

fn error_message(response: &Value) -> String {
    response
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| response.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::net::TcpListener;
    use std::thread;

    struct NoopPreparer;
    impl EpochPreparer for NoopPreparer {
        fn prepare(&self, _seed: &str) -> Result<(), MinerError> {
            Ok(())
        }
    }

    fn job_json(id: &str) -> String {
        format!(
            "{{\"job_id\":\"{}\",\"blob\":\"{}\",\"target\":\"1d00ffff\",\"height\":42,\"seed_hash\":\"{}\"}}",
            id,
            "00".repeat(76),
            "ab".repeat(32),
        )
    }

    fn login_response(job_id: &str) -> String {
        format!(
            "{{\"id\":1,\"jsonrpc\":\"2.0\",\"result\":{{\"id\":\"sess-1\",\"job\":{}}}}}",
            job_json(job_id)
        )
    }

    /// Starts a scripted pool: consumes the login request, answers with
    /// the canned login response, then runs `script` on the connection.
    fn scripted_pool<F>(
        script: F,
    ) -> (
        Arc<PoolClient>,
        Arc<JobRegistry>,
        thread::JoinHandle<()>,
    )
    where
        F: FnOnce(BufReader<TcpStream>, TcpStream) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(socket.try_clone().unwrap());
            let mut writer = socket;

            let mut login = String::new();
            reader.read_line(&mut login).unwrap();
            assert!(login.contains("\"method\":\"login\""));
            assert!(login.contains("\"worker\":\"worker1\""));
            writer
                .write_all((login_response("100") + "\n").as_bytes())
                .unwrap();

            script(reader, writer);
        });

        let registry = Arc::new(JobRegistry::new());
        let client = Arc::new(PoolClient::new(
            PoolConfig {
                host: "127.0.0.1".into(),
                port,
                wallet: "wallet".into(),
                password: "x".into(),
                worker: "worker1".into(),
                agent: "MoneroMiner/1.0.0".into(),
            },
            Arc::clone(&registry),
            Arc::new(NoopPreparer),
            Arc::new(AtomicBool::new(false)),
        ));
        (client, registry, server)
    }

    fn share() -> Share {
        Share {
            job_id: "100".into(),
            nonce: 0xdeadbeef,
            hash: [0x11; 32],
        }
    }

    #[test]
    fn login_publishes_first_job() {
        let (client, registry, server) = scripted_pool(|_reader, _writer| {});

        client.connect_and_login().unwrap();
        server.join().unwrap();

        let job = registry.current_snapshot().unwrap();
        assert_eq!(job.job_id, "100");
        assert_eq!(registry.epoch(), 1);
    }

    #[test]
    fn submit_round_trip_accepted() {
        let (client, _registry, server) = scripted_pool(|mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let v: Value = serde_json::from_str(&line).unwrap();
            assert_eq!(v["method"], "submit");
            assert_eq!(v["params"]["id"], "sess-1");
            assert_eq!(v["params"]["job_id"], "100");
            assert_eq!(v["params"]["nonce"], "deadbeef");
            assert_eq!(v["params"]["result"], "11".repeat(32));
            assert_eq!(v["params"]["algo"], "rx/0");

            let reply = format!("{{\"id\":{},\"result\":{{\"status\":\"OK\"}}}}\n", v["id"]);
            writer.write_all(reply.as_bytes()).unwrap();
        });

        client.connect_and_login().unwrap();
        assert!(client.submit(&share()).unwrap());
        server.join().unwrap();
    }

    #[test]
    fn submit_rejection_is_not_an_error() {
        let (client, _registry, server) = scripted_pool(|mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let v: Value = serde_json::from_str(&line).unwrap();
            let reply = format!(
                "{{\"id\":{},\"error\":{{\"message\":\"low difficulty\"}}}}\n",
                v["id"]
            );
            writer.write_all(reply.as_bytes()).unwrap();
        });

        client.connect_and_login().unwrap();
        assert!(!client.submit(&share()).unwrap());
        server.join().unwrap();
    }

    #[test]
    fn job_line_during_submit_reaches_registry() {
        let (client, registry, server) = scripted_pool(|mut reader, mut writer| {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let v: Value = serde_json::from_str(&line).unwrap();

            // A notification sneaks in ahead of the submit response.
            let notify = format!(
                "{{\"jsonrpc\":\"2.0\",\"method\":\"job\",\"params\":{}}}\n",
                job_json("101")
            );
            let reply = format!("{{\"id\":{},\"result\":{{\"status\":\"OK\"}}}}\n", v["id"]);
            writer.write_all(notify.as_bytes()).unwrap();
            writer.write_all(reply.as_bytes()).unwrap();
        });

        client.connect_and_login().unwrap();
        assert!(client.submit(&share()).unwrap());
        server.join().unwrap();

        // The notification was parked for the listener; drain it the
        // way the listener loop does.
        client.drain_backlog().unwrap();
        assert_eq!(registry.current_snapshot().unwrap().job_id, "101");
        assert_eq!(registry.epoch(), 2);
    }

    #[test]
    fn listener_survives_junk_and_dispatches_jobs() {
        let (client, registry, server) = scripted_pool(|_reader, mut writer| {
            writer.write_all(b"\n").unwrap();
            writer.write_all(b"this is not json\n").unwrap();
            let notify = format!(
                "{{\"jsonrpc\":\"2.0\",\"method\":\"job\",\"params\":{}}}\n",
                job_json("200")
            );
            writer.write_all(notify.as_bytes()).unwrap();
        });

        client.connect_and_login().unwrap();

        // Drive the listener poll manually: pull lines until the job
        // notification has been dispatched.
        for _ in 0..20 {
            if registry.epoch() >= 2 {
                break;
            }
            let line = {
                let mut guard = client.conn.lock().unwrap();
                guard
                    .as_mut()
                    .unwrap()
                    .read_line(Duration::from_millis(200))
                    .unwrap()
            };
            if let Some(line) = line {
                client.dispatch(&line).unwrap();
            }
        }
        server.join().unwrap();

        assert_eq!(registry.current_snapshot().unwrap().job_id, "200");
    }

    #[test]
    fn duplicate_notification_does_not_advance_epoch() {
        let (client, registry, server) = scripted_pool(|_reader, _writer| {});
        client.connect_and_login().unwrap();
        server.join().unwrap();

        // Same numeric id as the login job.
        let notify = format!(
            "{{\"jsonrpc\":\"2.0\",\"method\":\"job\",\"params\":{}}}",
            job_json("100")
        );
        client.dispatch(&notify).unwrap();
        assert_eq!(registry.epoch(), 1);
    }
}
