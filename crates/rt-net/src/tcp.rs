// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A loopback-TCP [`Transport`]: one OS process per locality, connected over
//! `127.0.0.1`, framed as an 8-byte little-endian length prefix followed by
//! that many bytes.
//!
//! [`rt_lco::LcoRuntime`] is a process-wide singleton (spec §9 sanctions
//! exactly one locality per process), so `gasrt`'s multi-rank demos cannot
//! simulate more than one locality inside a single OS process the way
//! [`crate::smp::SmpTransport`]'s unit tests do; instead `gasrt`'s `boot =
//! smp` launches one child process per rank and wires them together with
//! this transport.

use crate::transport::Transport;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

pub struct TcpTransport {
    rank: u32,
    addrs: Vec<SocketAddr>,
    peers: Vec<Mutex<Option<TcpStream>>>,
    inbox: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl TcpTransport {
    /// Binds `addrs[rank]` and starts accepting connections from the other
    /// localities in the fabric. Every rank must eventually bind before any
    /// rank sends to it; [`Self::send`] retries its initial connect a few
    /// times to ride out the startup race between sibling processes.
    pub fn bind(rank: u32, addrs: Vec<SocketAddr>) -> io::Result<Arc<Self>> {
        let listener = TcpListener::bind(addrs[rank as usize])?;
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        let accept_inbox = inbox.clone();
        thread::Builder::new()
            .name(format!("gasrt-net-accept-{rank}"))
            .spawn(move || {
                for stream in listener.incoming() {
                    let Ok(stream) = stream else { continue };
                    let _ = stream.set_nodelay(true);
                    let inbox = accept_inbox.clone();
                    thread::spawn(move || read_loop(stream, inbox));
                }
            })?;
        let peers = addrs.iter().map(|_| Mutex::new(None)).collect();
        Ok(Arc::new(Self {
            rank,
            addrs,
            peers,
            inbox,
        }))
    }

    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    fn connect(&self, locality: usize) -> io::Result<TcpStream> {
        let mut last_err = None;
        for attempt in 0..10 {
            match TcpStream::connect(self.addrs[locality]) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(err) => {
                    last_err = Some(err);
                    thread::sleep(Duration::from_millis(20 * (attempt + 1)));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::other("connect failed")))
    }
}

fn read_loop(mut stream: TcpStream, inbox: Arc<Mutex<VecDeque<Vec<u8>>>>) {
    loop {
        let mut len_buf = [0u8; 8];
        if stream.read_exact(&mut len_buf).is_err() {
            return;
        }
        let len = u64::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        if stream.read_exact(&mut buf).is_err() {
            return;
        }
        inbox.lock().unwrap().push_back(buf);
    }
}

impl Transport for TcpTransport {
    fn send(&self, locality: u32, bytes: Vec<u8>) {
        let idx = locality as usize;
        let mut guard = self.peers[idx].lock().unwrap();
        if guard.is_none() {
            match self.connect(idx) {
                Ok(stream) => *guard = Some(stream),
                Err(err) => {
                    tracing::warn!(locality, %err, "failed to connect to peer locality");
                    return;
                }
            }
        }
        if let Some(stream) = guard.as_mut() {
            let len = (bytes.len() as u64).to_le_bytes();
            if stream
                .write_all(&len)
                .and_then(|()| stream.write_all(&bytes))
                .is_err()
            {
                tracing::warn!(locality, "peer connection reset, will reconnect on next send");
                *guard = None;
            }
        }
    }

    fn try_recv(&self) -> Option<Vec<u8>> {
        self.inbox.lock().unwrap().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_ranks_exchange_a_framed_message() {
        let addrs = vec![
            "127.0.0.1:18471".parse().unwrap(),
            "127.0.0.1:18472".parse().unwrap(),
        ];
        let a = TcpTransport::bind(0, addrs.clone()).unwrap();
        let b = TcpTransport::bind(1, addrs).unwrap();

        a.send(1, vec![1, 2, 3]);

        let start = std::time::Instant::now();
        let mut received = None;
        while start.elapsed() < Duration::from_secs(5) {
            if let Some(bytes) = b.try_recv() {
                received = Some(bytes);
                break;
            }
            thread::yield_now();
        }
        assert_eq!(received, Some(vec![1, 2, 3]));
    }
}
