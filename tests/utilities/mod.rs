// Copyright CacheLink Project Contributors - SPDX Identifier: Apache-2.0

//! In-process servers for exercising the clients over real sockets.
//!
//! Both mocks keep a small keyspace behind a mutex and speak just enough of
//! their protocol for the integration suites: every reply a client codepath
//! can receive has a producing command here. Listeners bind with
//! `SO_REUSEADDR` so a test can kill a mock and restart it on the same port.

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

fn bind(addr: &str) -> TcpListener {
    let socket = TcpSocket::new_v4().unwrap();
    socket.set_reuseaddr(true).unwrap();
    socket.bind(addr.parse::<SocketAddr>().unwrap()).unwrap();
    socket.listen(64).unwrap()
}

type ConnTasks = Arc<Mutex<Vec<JoinHandle<()>>>>;

fn accept_loop<F, Fut>(listener: TcpListener, conn_tasks: ConnTasks, serve: F) -> JoinHandle<()>
where
    F: Fn(TcpStream) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let task = tokio::spawn(serve(stream));
            conn_tasks.lock().unwrap().push(task);
        }
    })
}

// ---------------------------------------------------------------------------
// Redis

struct RedisEntry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl RedisEntry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

type RedisStore = Arc<Mutex<HashMap<Vec<u8>, RedisEntry>>>;

/// A minimal RESP2 server backed by an in-memory keyspace.
pub struct RedisMock {
    address: String,
    accept_task: JoinHandle<()>,
    conn_tasks: ConnTasks,
}

impl RedisMock {
    pub fn start() -> RedisMock {
        Self::start_on("127.0.0.1:0")
    }

    /// Binds the given address; pass a previous mock's [`RedisMock::address`]
    /// to simulate a server restart.
    pub fn start_on(addr: &str) -> RedisMock {
        let listener = bind(addr);
        let address = listener.local_addr().unwrap().to_string();
        let store: RedisStore = Arc::new(Mutex::new(HashMap::new()));
        let conn_tasks: ConnTasks = Arc::new(Mutex::new(Vec::new()));
        let accept_task = accept_loop(listener, Arc::clone(&conn_tasks), move |stream| {
            let store = Arc::clone(&store);
            async move {
                let _ = serve_resp(stream, store).await;
            }
        });
        RedisMock {
            address,
            accept_task,
            conn_tasks,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Kills the listener and every open connection without any grace.
    pub fn shutdown(self) {
        self.accept_task.abort();
        for task in self.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn read_resp_command(reader: &mut BufReader<OwnedReadHalf>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    assert!(line.starts_with(b"*"), "expected a command array");
    let argc: usize = std::str::from_utf8(&line[1..line.len() - 2])
        .unwrap()
        .parse()
        .unwrap();
    let mut args = Vec::with_capacity(argc);
    for _ in 0..argc {
        line.clear();
        reader.read_until(b'\n', &mut line).await?;
        assert!(line.starts_with(b"$"), "expected a bulk-string argument");
        let len: usize = std::str::from_utf8(&line[1..line.len() - 2])
            .unwrap()
            .parse()
            .unwrap();
        let mut arg = vec![0u8; len + 2];
        reader.read_exact(&mut arg).await?;
        arg.truncate(len);
        args.push(arg);
    }
    Ok(Some(args))
}

fn simple(text: &str) -> Vec<u8> {
    format!("+{text}\r\n").into_bytes()
}

fn error(text: &str) -> Vec<u8> {
    format!("-{text}\r\n").into_bytes()
}

fn integer(value: i64) -> Vec<u8> {
    format!(":{value}\r\n").into_bytes()
}

fn bulk(value: &[u8]) -> Vec<u8> {
    let mut reply = format!("${}\r\n", value.len()).into_bytes();
    reply.extend_from_slice(value);
    reply.extend_from_slice(b"\r\n");
    reply
}

fn nil() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

async fn serve_resp(stream: TcpStream, store: RedisStore) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    while let Some(args) = read_resp_command(&mut reader).await? {
        let reply = dispatch_resp(&store, &args);
        write_half.write_all(&reply).await?;
    }
    Ok(())
}

fn dispatch_resp(store: &RedisStore, args: &[Vec<u8>]) -> Vec<u8> {
    let mut store = store.lock().unwrap();
    store.retain(|_, entry| entry.live());
    let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
    match command.as_str() {
        "GET" => match store.get(&args[1]) {
            Some(entry) => bulk(&entry.value),
            None => nil(),
        },
        "SET" => {
            let mut expires_at = None;
            let mut nx = false;
            let mut xx = false;
            let mut get = false;
            let mut option = 3;
            while option < args.len() {
                match String::from_utf8_lossy(&args[option]).to_ascii_uppercase().as_str() {
                    "EX" => {
                        let seconds: u64 = std::str::from_utf8(&args[option + 1])
                            .unwrap()
                            .parse()
                            .unwrap();
                        expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                        option += 2;
                    }
                    "NX" => {
                        nx = true;
                        option += 1;
                    }
                    "XX" => {
                        xx = true;
                        option += 1;
                    }
                    "GET" => {
                        get = true;
                        option += 1;
                    }
                    other => return error(&format!("ERR unknown SET option {other}")),
                }
            }
            let previous = store.get(&args[1]).map(|entry| entry.value.clone());
            let blocked = (nx && previous.is_some()) || (!nx && xx && previous.is_none());
            if !blocked {
                store.insert(
                    args[1].clone(),
                    RedisEntry {
                        value: args[2].clone(),
                        expires_at,
                    },
                );
            }
            match (get, blocked, previous) {
                (true, _, Some(value)) => bulk(&value),
                (true, _, None) => nil(),
                (false, true, _) => nil(),
                (false, false, _) => simple("OK"),
            }
        }
        "DEL" => {
            let mut removed = 0;
            for key in &args[1..] {
                if store.remove(key).is_some() {
                    removed += 1;
                }
            }
            integer(removed)
        }
        "INCR" | "INCRBY" | "DECR" | "DECRBY" => {
            let delta: i64 = match command.as_str() {
                "INCR" => 1,
                "DECR" => -1,
                _ => {
                    let step: i64 = std::str::from_utf8(&args[2]).unwrap().parse().unwrap();
                    if command == "DECRBY" {
                        -step
                    } else {
                        step
                    }
                }
            };
            let current = match store.get(&args[1]) {
                Some(entry) => match std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|text| text.parse::<i64>().ok())
                {
                    Some(value) => value,
                    None => return error("ERR value is not an integer or out of range"),
                },
                None => 0,
            };
            let next = current + delta;
            let expires_at = store.get(&args[1]).and_then(|entry| entry.expires_at);
            store.insert(
                args[1].clone(),
                RedisEntry {
                    value: next.to_string().into_bytes(),
                    expires_at,
                },
            );
            integer(next)
        }
        "EXPIRE" => {
            let seconds: u64 = std::str::from_utf8(&args[2]).unwrap().parse().unwrap();
            match store.get_mut(&args[1]) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds));
                    integer(1)
                }
                None => integer(0),
            }
        }
        "TTL" => match store.get(&args[1]) {
            Some(entry) => match entry.expires_at {
                Some(at) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    integer(remaining.as_secs().max(1) as i64)
                }
                None => integer(-1),
            },
            None => integer(-2),
        },
        "EXISTS" => integer(args[1..].iter().filter(|key| store.contains_key(*key)).count() as i64),
        "PING" => match args.len() {
            1 => simple("PONG"),
            _ => bulk(&args[1]),
        },
        "FLUSHDB" => {
            store.clear();
            simple("OK")
        }
        "DBSIZE" => integer(store.len() as i64),
        other => error(&format!("ERR unknown command '{other}'")),
    }
}

/// A listener that answers every connection with bytes no client expects.
/// Useful for driving the non-resumable classification path.
pub fn garbage_server() -> (String, JoinHandle<()>) {
    let listener = bind("127.0.0.1:0");
    let address = listener.local_addr().unwrap().to_string();
    let task = tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut scratch = [0u8; 512];
                loop {
                    match stream.read(&mut scratch).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if stream.write_all(b"!!!garbage!!!\r\n").await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    (address, task)
}

// ---------------------------------------------------------------------------
// Memcached

struct McEntry {
    value: Vec<u8>,
    flags: u32,
    cas: u64,
    expires_at: Option<Instant>,
}

impl McEntry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

struct McState {
    items: HashMap<Vec<u8>, McEntry>,
    next_cas: u64,
}

type McStore = Arc<Mutex<McState>>;

/// A minimal meta-protocol server backed by an in-memory keyspace.
pub struct MemcachedMock {
    address: String,
    accept_task: JoinHandle<()>,
    conn_tasks: ConnTasks,
}

impl MemcachedMock {
    pub fn start() -> MemcachedMock {
        Self::start_on("127.0.0.1:0")
    }

    pub fn start_on(addr: &str) -> MemcachedMock {
        let listener = bind(addr);
        let address = listener.local_addr().unwrap().to_string();
        let store: McStore = Arc::new(Mutex::new(McState {
            items: HashMap::new(),
            next_cas: 1,
        }));
        let conn_tasks: ConnTasks = Arc::new(Mutex::new(Vec::new()));
        let accept_task = accept_loop(listener, Arc::clone(&conn_tasks), move |stream| {
            let store = Arc::clone(&store);
            async move {
                let _ = serve_meta(stream, store).await;
            }
        });
        MemcachedMock {
            address,
            accept_task,
            conn_tasks,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn shutdown(self) {
        self.accept_task.abort();
        for task in self.conn_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
    }
}

async fn serve_meta(stream: TcpStream, store: McStore) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let text = String::from_utf8_lossy(&line[..line.len() - 2]).into_owned();
        let tokens: Vec<&str> = text.split(' ').collect();
        let reply = match tokens[0] {
            "mg" => meta_get(&store, &tokens),
            "ms" => {
                let size: usize = tokens[2].parse().unwrap();
                let mut payload = vec![0u8; size + 2];
                reader.read_exact(&mut payload).await?;
                payload.truncate(size);
                meta_set(&store, &tokens, payload)
            }
            "md" => meta_delete(&store, &tokens),
            "ma" => meta_arithmetic(&store, &tokens),
            "mn" => b"MN\r\n".to_vec(),
            "flush_all" => {
                store.lock().unwrap().items.clear();
                b"OK\r\n".to_vec()
            }
            "version" => b"VERSION 1.6.0-mock\r\n".to_vec(),
            _ => b"ERROR\r\n".to_vec(),
        };
        write_half.write_all(&reply).await?;
    }
}

fn meta_get(store: &McStore, tokens: &[&str]) -> Vec<u8> {
    let mut state = store.lock().unwrap();
    state.items.retain(|_, entry| entry.live());
    let key = tokens[1].as_bytes();
    let want_value = tokens[2..].contains(&"v");
    let want_flags = tokens[2..].contains(&"f");
    let want_cas = tokens[2..].contains(&"c");
    let touch_ttl = tokens[2..]
        .iter()
        .find_map(|token| token.strip_prefix('T'))
        .map(|ttl| ttl.parse::<u64>().unwrap());

    let Some(entry) = state.items.get_mut(key) else {
        return b"EN\r\n".to_vec();
    };
    if let Some(ttl) = touch_ttl {
        entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl));
    }
    if !want_value {
        return b"HD\r\n".to_vec();
    }
    let mut header = format!("VA {}", entry.value.len());
    if want_flags {
        header.push_str(&format!(" f{}", entry.flags));
    }
    if want_cas {
        header.push_str(&format!(" c{}", entry.cas));
    }
    let mut reply = header.into_bytes();
    reply.extend_from_slice(b"\r\n");
    reply.extend_from_slice(&entry.value);
    reply.extend_from_slice(b"\r\n");
    reply
}

fn meta_set(store: &McStore, tokens: &[&str], payload: Vec<u8>) -> Vec<u8> {
    let mut state = store.lock().unwrap();
    state.items.retain(|_, entry| entry.live());
    let key = tokens[1].as_bytes().to_vec();
    let mut ttl = None;
    let mut flags = 0;
    let mut cas = None;
    let mut mode = "E?";
    for token in &tokens[3..] {
        if let Some(rest) = token.strip_prefix('T') {
            ttl = Some(rest.parse::<u64>().unwrap());
        } else if let Some(rest) = token.strip_prefix('F') {
            flags = rest.parse::<u32>().unwrap();
        } else if let Some(rest) = token.strip_prefix('C') {
            cas = Some(rest.parse::<u64>().unwrap());
        } else if let Some(rest) = token.strip_prefix('M') {
            mode = match *rest.as_bytes().first().unwrap() {
                b'E' => "add",
                b'R' => "replace",
                b'A' => "append",
                b'P' => "prepend",
                _ => "set",
            };
        }
    }
    if mode == "E?" {
        mode = "set";
    }
    let existing = state.items.get(&key);
    if let Some(expected) = cas {
        match existing {
            None => return b"NF\r\n".to_vec(),
            Some(entry) if entry.cas != expected => return b"EX\r\n".to_vec(),
            Some(_) => {}
        }
    }
    match mode {
        "add" if existing.is_some() => return b"NS\r\n".to_vec(),
        "replace" | "append" | "prepend" if existing.is_none() => return b"NS\r\n".to_vec(),
        _ => {}
    }
    let value = match mode {
        "append" => {
            let mut value = existing.unwrap().value.clone();
            value.extend_from_slice(&payload);
            value
        }
        "prepend" => {
            let mut value = payload.clone();
            value.extend_from_slice(&existing.unwrap().value);
            value
        }
        _ => payload,
    };
    let token = state.next_cas;
    state.next_cas += 1;
    state.items.insert(
        key,
        McEntry {
            value,
            flags,
            cas: token,
            expires_at: ttl.map(|ttl| Instant::now() + Duration::from_secs(ttl)),
        },
    );
    b"HD\r\n".to_vec()
}

fn meta_delete(store: &McStore, tokens: &[&str]) -> Vec<u8> {
    let mut state = store.lock().unwrap();
    match state.items.remove(tokens[1].as_bytes()) {
        Some(_) => b"HD\r\n".to_vec(),
        None => b"NF\r\n".to_vec(),
    }
}

fn meta_arithmetic(store: &McStore, tokens: &[&str]) -> Vec<u8> {
    let mut state = store.lock().unwrap();
    state.items.retain(|_, entry| entry.live());
    let key = tokens[1].as_bytes();
    let delta = tokens[2..]
        .iter()
        .find_map(|token| token.strip_prefix('D'))
        .map_or(1, |delta| delta.parse::<u64>().unwrap());
    let decrement = tokens[2..].contains(&"MD");

    let token = state.next_cas;
    state.next_cas += 1;
    let Some(entry) = state.items.get_mut(key) else {
        return b"NF\r\n".to_vec();
    };
    let current: u64 = std::str::from_utf8(&entry.value).unwrap().parse().unwrap();
    let next = if decrement {
        current.saturating_sub(delta)
    } else {
        current + delta
    };
    entry.value = next.to_string().into_bytes();
    entry.cas = token;
    let digits = next.to_string();
    format!("VA {}\r\n{digits}\r\n", digits.len()).into_bytes()
}
