//! In-memory transport for unit tests

use std::cell::{Cell, RefCell};
use std::io::{self, BufReader, Cursor, Read, Write};
use std::rc::Rc;
use std::time::Duration;

use crate::channel::Transport;
use crate::codec;
use crate::protocol::Unit;

/// Replays canned server bytes and records everything the client writes
#[derive(Clone)]
pub struct FakeTransport {
    input: Rc<RefCell<Cursor<Vec<u8>>>>,
    output: Rc<RefCell<Vec<u8>>>,
    shutdowns: Rc<Cell<usize>>,
}

impl FakeTransport {
    pub fn scripted(replies: &[Unit]) -> Self {
        let bytes: String = replies.iter().map(Unit::encode).collect();
        Self::raw(bytes.as_bytes())
    }

    pub fn raw(bytes: &[u8]) -> Self {
        Self {
            input: Rc::new(RefCell::new(Cursor::new(bytes.to_vec()))),
            output: Rc::default(),
            shutdowns: Rc::default(),
        }
    }

    /// Units written by the client so far
    pub fn sent(&self) -> Vec<Unit> {
        let bytes = self.output.borrow().clone();
        let mut reader = BufReader::new(Cursor::new(bytes));
        let mut units = Vec::new();
        while let Ok(unit) = codec::read_unit(&mut reader) {
            units.push(unit);
        }
        units
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.get()
    }
}

impl Read for FakeTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.input.borrow_mut().read(buf)
    }
}

impl Write for FakeTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for FakeTransport {
    fn set_read_timeout(&self, _timeout: Option<Duration>) -> io::Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> io::Result<()> {
        self.shutdowns.set(self.shutdowns.get() + 1);
        Ok(())
    }
}
