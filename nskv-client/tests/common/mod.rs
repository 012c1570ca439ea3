#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use nskv_client::{Client, ClientConfig};
use nskv_store::{StoreConfig, StoreHandle, StoreServer};

/// Starts an in-process store on an ephemeral port.
pub fn start_store(config: StoreConfig) -> StoreHandle {
    StoreServer::start(config).expect("start store")
}

pub fn open_store() -> StoreHandle {
    start_store(StoreConfig::local())
}

pub fn config_for(store: &StoreHandle) -> ClientConfig {
    let mut config = ClientConfig::new(store.addr().to_string());
    config.read_timeout = Some(Duration::from_secs(2));
    config.write_timeout = Some(Duration::from_secs(2));
    config.connect_timeout = Some(Duration::from_secs(2));
    config
}

pub fn client_for(store: &StoreHandle) -> Client {
    Client::new(config_for(store)).expect("client")
}

/// Accepts one connection and answers `expected_commands` commands with `handler`.
pub fn spawn_server(
    expected_commands: usize,
    handler: fn(usize, Vec<Vec<u8>>, &mut TcpStream),
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut reader = BufReader::new(stream.try_clone().expect("clone"));
        for idx in 0..expected_commands {
            let args = read_command(&mut reader).expect("read command");
            handler(idx, args, &mut stream);
        }
    });

    addr
}

/// Client config for a scripted server: one connection, no liveness checks.
pub fn scripted_config(addr: String) -> ClientConfig {
    ClientConfig {
        max_active: 1,
        max_idle: 1,
        test_on_borrow: false,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
        ..ClientConfig::new(addr)
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<Vec<u8>>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        if !data.ends_with(b"\r\n") {
            return Err(invalid("missing crlf"));
        }
        data.truncate(len);
        args.push(data);
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("length"))
}

fn invalid(msg: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

pub fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("+{msg}\r\n").as_bytes());
    let _ = stream.flush();
}

pub fn write_error(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("-{msg}\r\n").as_bytes());
    let _ = stream.flush();
}

pub fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(format!(":{value}\r\n").as_bytes());
    let _ = stream.flush();
}

pub fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(&bulk(data));
    let _ = stream.flush();
}

/// Writes a `SCAN` reply: `[cursor, [keys...]]`.
pub fn write_scan(stream: &mut TcpStream, cursor: u64, keys: &[&str]) {
    let mut reply = b"*2\r\n".to_vec();
    reply.extend_from_slice(&bulk(cursor.to_string().as_bytes()));
    reply.extend_from_slice(format!("*{}\r\n", keys.len()).as_bytes());
    for key in keys {
        reply.extend_from_slice(&bulk(key.as_bytes()));
    }
    let _ = stream.write_all(&reply);
    let _ = stream.flush();
}

fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}
