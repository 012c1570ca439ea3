//! # TCP Server
//!
//! Accept RESP2 connections, parse commands, and dispatch them against the
//! shared keyspace.
//!
//! Two entry points:
//! - [`run`]: async, for the `nskv-store` binary.
//! - [`StoreServer::start`]: runs the server on its own thread and runtime
//!   and returns a [`StoreHandle`], for tests of blocking clients.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::keyspace::Keyspace;
use crate::protocol::{
    resp_bulk, resp_error, resp_error_code, resp_integer, resp_null, resp_scan,
    resp_simple, RespError, RespParser,
};

/// Default `SCAN` page size when the client sends no `COUNT`.
const DEFAULT_SCAN_COUNT: usize = 10;

struct Shared {
    config: StoreConfig,
    keyspace: Keyspace,
    accepted: AtomicUsize,
    // Bumped to make every open connection hang up.
    kick: watch::Sender<u64>,
}

impl Shared {
    fn new(config: StoreConfig) -> Self {
        let (kick, _) = watch::channel(0);
        Shared {
            config,
            keyspace: Keyspace::new(),
            accepted: AtomicUsize::new(0),
            kick,
        }
    }
}

/// Per-connection state.
struct Session {
    authenticated: bool,
}

/// Binds `config.addr` and serves until `shutdown` resolves.
pub async fn run<F>(config: StoreConfig, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(&config.addr).await?;
    info!(addr = %listener.local_addr()?, auth = config.requires_auth(), "store listening");
    serve(listener, Arc::new(Shared::new(config)), shutdown).await;
    Ok(())
}

async fn serve<F>(listener: TcpListener, shared: Arc<Shared>, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("store shutting down");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    shared.accepted.fetch_add(1, Ordering::Relaxed);
                    debug!(%peer, "connection accepted");
                    let kick = shared.kick.subscribe();
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, shared, kick).await {
                            debug!(%peer, error = %err, "connection closed with error");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

/// Handles a single TCP client connection.
async fn handle_connection(
    mut stream: TcpStream,
    shared: Arc<Shared>,
    mut kick: watch::Receiver<u64>,
) -> io::Result<()> {
    stream.set_nodelay(true)?;
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut parser = RespParser::new();
    let mut session = Session {
        authenticated: !shared.config.requires_auth(),
    };

    loop {
        let bytes = tokio::select! {
            read = stream.read_buf(&mut buffer) => read?,
            _ = kick.changed() => {
                debug!("dropping connection on request");
                return Ok(());
            }
        };
        if bytes == 0 {
            break;
        }

        loop {
            match parser.parse(&mut buffer) {
                Ok(Some(args)) => {
                    let response = dispatch(&args, &shared, &mut session);
                    stream.write_all(&response).await?;
                }
                Ok(None) => break,
                Err(RespError::Protocol) => {
                    stream.write_all(&resp_error("Protocol error")).await?;
                    return Ok(());
                }
            }
        }
    }

    Ok(())
}

fn dispatch(args: &[Vec<u8>], shared: &Shared, session: &mut Session) -> Vec<u8> {
    let Some(name) = args.first() else {
        return resp_error("empty command");
    };
    let name = name.to_ascii_uppercase();

    if name == b"AUTH" {
        return handle_auth(args, &shared.config, session);
    }
    if !session.authenticated {
        return resp_error_code("NOAUTH", "Authentication required.");
    }

    let keyspace = &shared.keyspace;
    match name.as_slice() {
        b"PING" => handle_ping(args),
        b"GET" => handle_get(args, keyspace),
        b"SET" => handle_set(args, keyspace),
        b"SETEX" => handle_setex(args, keyspace),
        b"EXISTS" => handle_exists(args, keyspace),
        b"DEL" | b"UNLINK" => handle_del(args, keyspace),
        b"SCAN" => handle_scan(args, keyspace, shared.config.scan_page_size),
        b"EVAL" => handle_eval(args, keyspace),
        b"DBSIZE" => resp_integer(keyspace.len() as i64),
        b"FLUSHALL" | b"FLUSHDB" => {
            keyspace.clear();
            resp_simple("OK")
        }
        b"INFO" => handle_info(shared),
        _ => resp_error(&format!(
            "unknown command '{}'",
            String::from_utf8_lossy(&args[0])
        )),
    }
}

fn wrong_arity(command: &str) -> Vec<u8> {
    resp_error(&format!("wrong number of arguments for '{command}' command"))
}

fn handle_auth(args: &[Vec<u8>], config: &StoreConfig, session: &mut Session) -> Vec<u8> {
    let (username, password) = match args.len() {
        2 => (None, &args[1]),
        3 => (Some(args[1].as_slice()), &args[2]),
        _ => return wrong_arity("auth"),
    };
    if !config.requires_auth() {
        return resp_error(
            "AUTH <password> called without any password configured for the default user. \
             Are you sure your configuration is correct?",
        );
    }
    if config.accepts(username, password) {
        session.authenticated = true;
        resp_simple("OK")
    } else {
        warn!("rejected AUTH attempt");
        resp_error_code("WRONGPASS", "invalid username-password pair or user is disabled.")
    }
}

fn handle_ping(args: &[Vec<u8>]) -> Vec<u8> {
    match args.len() {
        1 => resp_simple("PONG"),
        2 => resp_bulk(&args[1]),
        _ => wrong_arity("ping"),
    }
}

fn handle_get(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() != 2 {
        return wrong_arity("get");
    }
    match keyspace.get(&args[1]) {
        Some(value) => resp_bulk(&value),
        None => resp_null(),
    }
}

/// `SET key value [NX] [EX seconds | PX milliseconds]`
fn handle_set(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() < 3 {
        return wrong_arity("set");
    }

    let mut nx = false;
    let mut ttl: Option<Duration> = None;
    let mut idx = 3;
    while idx < args.len() {
        let option = args[idx].to_ascii_uppercase();
        match option.as_slice() {
            b"NX" => nx = true,
            b"EX" | b"PX" if ttl.is_none() && idx + 1 < args.len() => {
                let amount = match parse_u64(&args[idx + 1]) {
                    Ok(amount) => amount,
                    Err(resp) => return resp,
                };
                if amount == 0 {
                    return resp_error("invalid expire time in 'set' command");
                }
                ttl = Some(if option == b"EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
                idx += 1;
            }
            _ => return resp_error("syntax error"),
        }
        idx += 1;
    }

    let written = if nx {
        keyspace.set_nx(&args[1], &args[2], ttl)
    } else {
        keyspace.set(&args[1], &args[2], ttl).map(|()| true)
    };
    match written {
        Ok(true) => resp_simple("OK"),
        Ok(false) => resp_null(),
        Err(_) => resp_error("invalid expire time in 'set' command"),
    }
}

/// `SETEX key seconds value`
fn handle_setex(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() != 4 {
        return wrong_arity("setex");
    }
    let seconds = match parse_u64(&args[2]) {
        Ok(seconds) => seconds,
        Err(resp) => return resp,
    };
    if seconds == 0 {
        return resp_error("invalid expire time in 'setex' command");
    }
    match keyspace.set(&args[1], &args[3], Some(Duration::from_secs(seconds))) {
        Ok(()) => resp_simple("OK"),
        Err(_) => resp_error("invalid expire time in 'setex' command"),
    }
}

fn handle_exists(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("exists");
    }
    let found = args[1..].iter().filter(|key| keyspace.exists(key)).count();
    resp_integer(found as i64)
}

fn handle_del(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("del");
    }
    let removed = args[1..].iter().filter(|key| keyspace.remove(key)).count();
    resp_integer(removed as i64)
}

/// `SCAN cursor [MATCH pattern] [COUNT count]`
fn handle_scan(args: &[Vec<u8>], keyspace: &Keyspace, page_size: Option<usize>) -> Vec<u8> {
    if args.len() < 2 {
        return wrong_arity("scan");
    }
    let Ok(cursor) = parse_u64(&args[1]) else {
        return resp_error("invalid cursor");
    };

    let mut pattern = None;
    let mut count = DEFAULT_SCAN_COUNT;
    let mut idx = 2;
    while idx < args.len() {
        if idx + 1 >= args.len() {
            return resp_error("syntax error");
        }
        let option = args[idx].to_ascii_uppercase();
        match option.as_slice() {
            b"MATCH" => pattern = Some(args[idx + 1].as_slice()),
            b"COUNT" => match parse_u64(&args[idx + 1]) {
                Ok(value) if value > 0 => count = value as usize,
                _ => return resp_error("syntax error"),
            },
            _ => return resp_error("syntax error"),
        }
        idx += 2;
    }

    let page = keyspace.scan(cursor, pattern, page_size.unwrap_or(count));
    resp_scan(page.cursor, &page.keys)
}

/// `EVAL script numkeys key... arg...`
///
/// Only the two token-guarded lock scripts are understood: compare-and-
/// `PEXPIRE` and compare-and-`DEL`. They are recognized by the command they
/// issue on a match.
fn handle_eval(args: &[Vec<u8>], keyspace: &Keyspace) -> Vec<u8> {
    if args.len() < 3 {
        return wrong_arity("eval");
    }
    let numkeys = match parse_u64(&args[2]) {
        Ok(n) if (n as usize) <= args.len() - 3 => n as usize,
        _ => return resp_error("Number of keys can't be greater than number of args"),
    };
    let keys = &args[3..3 + numkeys];
    let argv = &args[3 + numkeys..];
    let script = &args[1];

    if contains(script, b"PEXPIRE") {
        let (Some(key), Some(token), Some(millis)) = (keys.first(), argv.first(), argv.get(1)) else {
            return resp_error("lock extend script needs one key and two args");
        };
        let millis = match parse_u64(millis) {
            Ok(millis) => millis,
            Err(resp) => return resp,
        };
        return match keyspace.expire_if_eq(key, token, Duration::from_millis(millis)) {
            Ok(status) => resp_integer(status),
            Err(_) => resp_error("invalid expire time in 'pexpire' command"),
        };
    }
    if contains(script, b"DEL") {
        let (Some(key), Some(token)) = (keys.first(), argv.first()) else {
            return resp_error("lock release script needs one key and one arg");
        };
        return resp_integer(keyspace.remove_if_eq(key, token));
    }
    resp_error("unsupported script")
}

fn handle_info(shared: &Shared) -> Vec<u8> {
    let info = format!(
        "# Server\r\nrole:master\r\nengine:nskv-store\r\nconnections_received:{}\r\n# Keyspace\r\nkeys:{}\r\n",
        shared.accepted.load(Ordering::Relaxed),
        shared.keyspace.len(),
    );
    resp_bulk(info.as_bytes())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}

fn parse_u64(arg: &[u8]) -> Result<u64, Vec<u8>> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|text| text.parse::<u64>().ok())
        .ok_or_else(|| resp_error("value is not an integer or out of range"))
}

/// Runs a store on a background thread.
pub struct StoreServer;

impl StoreServer {
    /// Binds synchronously, so the returned address is ready to accept
    /// connections as soon as this returns.
    pub fn start(config: StoreConfig) -> io::Result<StoreHandle> {
        let listener = std::net::TcpListener::bind(&config.addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        let shared = Arc::new(Shared::new(config));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("nskv-store".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            error!(error = %err, "failed to register listener");
                            return;
                        }
                    };
                    serve(listener, task_shared, async {
                        let _ = shutdown_rx.await;
                    })
                    .await;
                });
                // Dropping the runtime here aborts the connection tasks.
            })?;

        info!(%addr, "store started");
        Ok(StoreHandle {
            addr,
            shared,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

/// Owner of a running store. Dropping it stops the store.
pub struct StoreHandle {
    addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl StoreHandle {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Connections accepted since start.
    pub fn connections_accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Hangs up every currently open connection. New ones are still accepted.
    pub fn drop_connections(&self) {
        self.shared.kick.send_modify(|generation| *generation += 1);
    }

    /// Direct access to the data, bypassing the network.
    pub fn keyspace(&self) -> &Keyspace {
        &self.shared.keyspace
    }

    /// Stops accepting, closes all connections, and waits for the thread.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("store thread panicked");
            }
        }
    }
}

impl Drop for StoreHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(parts: &[&str]) -> Vec<Vec<u8>> {
        parts.iter().map(|part| part.as_bytes().to_vec()).collect()
    }

    fn open_session() -> (Shared, Session) {
        (Shared::new(StoreConfig::local()), Session { authenticated: true })
    }

    #[test]
    fn set_options() {
        let (shared, mut session) = open_session();
        assert_eq!(dispatch(&cmd(&["SET", "k", "v", "NX"]), &shared, &mut session), b"+OK\r\n");
        assert_eq!(dispatch(&cmd(&["set", "k", "w", "nx"]), &shared, &mut session), b"$-1\r\n");
        assert_eq!(
            dispatch(&cmd(&["SET", "k", "w", "PX", "5000"]), &shared, &mut session),
            b"+OK\r\n"
        );
        assert_eq!(dispatch(&cmd(&["GET", "k"]), &shared, &mut session), b"$1\r\nw\r\n");
        assert_eq!(
            dispatch(&cmd(&["SET", "k", "w", "EX"]), &shared, &mut session),
            b"-ERR syntax error\r\n"
        );
    }

    #[test]
    fn setex_rejects_zero_seconds() {
        let (shared, mut session) = open_session();
        let reply = dispatch(&cmd(&["SETEX", "k", "0", "v"]), &shared, &mut session);
        assert_eq!(reply, b"-ERR invalid expire time in 'setex' command\r\n");
        let reply = dispatch(&cmd(&["SETEX", "k", "2", "v"]), &shared, &mut session);
        assert_eq!(reply, b"+OK\r\n");
        assert!(shared.keyspace.exists(b"k"));
    }

    #[test]
    fn oversized_expiry_is_an_error_reply() {
        let (shared, mut session) = open_session();
        let max = u64::MAX.to_string();
        let max = max.as_str();

        let reply = dispatch(&cmd(&["SETEX", "k", max, "v"]), &shared, &mut session);
        assert_eq!(reply, b"-ERR invalid expire time in 'setex' command\r\n");
        let reply = dispatch(&cmd(&["SET", "k", "v", "EX", max]), &shared, &mut session);
        assert_eq!(reply, b"-ERR invalid expire time in 'set' command\r\n");
        let reply = dispatch(&cmd(&["SET", "k", "v", "NX", "PX", max]), &shared, &mut session);
        assert_eq!(reply, b"-ERR invalid expire time in 'set' command\r\n");
        assert!(!shared.keyspace.exists(b"k"));

        shared.keyspace.set(b"lock", b"mine", None).unwrap();
        let extend = "return redis.call(\"PEXPIRE\", KEYS[1], ARGV[2])";
        let reply = dispatch(&cmd(&["EVAL", extend, "1", "lock", "mine", max]), &shared, &mut session);
        assert!(reply.starts_with(b"-ERR invalid expire time"));

        // The keyspace lock was not poisoned or left held.
        assert_eq!(dispatch(&cmd(&["PING"]), &shared, &mut session), b"+PONG\r\n");
        assert_eq!(dispatch(&cmd(&["DBSIZE"]), &shared, &mut session), b":1\r\n");
    }

    #[test]
    fn auth_gate() {
        let shared = Shared::new(StoreConfig {
            password: Some("pw".to_string()),
            ..StoreConfig::local()
        });
        let mut session = Session { authenticated: false };
        let reply = dispatch(&cmd(&["GET", "k"]), &shared, &mut session);
        assert!(reply.starts_with(b"-NOAUTH"));
        let reply = dispatch(&cmd(&["AUTH", "bad"]), &shared, &mut session);
        assert!(reply.starts_with(b"-WRONGPASS"));
        assert_eq!(dispatch(&cmd(&["AUTH", "pw"]), &shared, &mut session), b"+OK\r\n");
        assert_eq!(dispatch(&cmd(&["GET", "k"]), &shared, &mut session), b"$-1\r\n");
    }

    #[test]
    fn scan_page_size_overrides_count() {
        let shared = Shared::new(StoreConfig {
            scan_page_size: Some(1),
            ..StoreConfig::local()
        });
        let mut session = Session { authenticated: true };
        shared.keyspace.set(b"a", b"1", None).unwrap();
        shared.keyspace.set(b"b", b"2", None).unwrap();
        let reply = dispatch(&cmd(&["SCAN", "0", "COUNT", "100"]), &shared, &mut session);
        assert_eq!(reply, resp_scan(2, &[b"a".to_vec()]));
    }

    #[test]
    fn lock_scripts_check_the_token() {
        let (shared, mut session) = open_session();
        shared.keyspace.set(b"lock", b"mine", Some(Duration::from_secs(5))).unwrap();
        let extend = "return redis.call(\"PEXPIRE\", KEYS[1], ARGV[2])";
        let release = "return redis.call(\"DEL\", KEYS[1])";

        let reply = dispatch(&cmd(&["EVAL", extend, "1", "lock", "theirs", "9000"]), &shared, &mut session);
        assert_eq!(reply, b":0\r\n");
        let reply = dispatch(&cmd(&["EVAL", extend, "1", "lock", "mine", "9000"]), &shared, &mut session);
        assert_eq!(reply, b":1\r\n");
        let reply = dispatch(&cmd(&["EVAL", release, "1", "lock", "mine"]), &shared, &mut session);
        assert_eq!(reply, b":1\r\n");
        assert!(!shared.keyspace.exists(b"lock"));
    }

    #[test]
    fn unknown_command() {
        let (shared, mut session) = open_session();
        let reply = dispatch(&cmd(&["NOPE"]), &shared, &mut session);
        assert_eq!(reply, b"-ERR unknown command 'NOPE'\r\n");
    }
}
