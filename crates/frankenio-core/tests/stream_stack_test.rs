//! Integration test: decorator stacks over terminal streams.
//!
//! Validates:
//! 1. Data filters over buffered filters over a pipe, across threads.
//! 2. An object stream over a pipe, across threads.
//! 3. Pushback and line-number filters over in-memory sources.
//! 4. Shared resources released by the last attachment or by close-all.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use frankenio_core::io::data::{DataInput, DataOutput};
use frankenio_core::io::piped::byte_pipe;
use frankenio_core::io::{
    BufferedInputStream, BufferedOutputStream, ByteArrayInputStream, DataInputStream,
    DataOutputStream, LineNumberReader, PushbackInputStream, Release, SharedResource,
    StringReader,
};
use frankenio_core::serial::{
    ClassDesc, Instance, ObjectInputStream, ObjectOutputStream, TypeCode, Value,
};
use frankenio_core::{ByteSink, ByteSource, IoError, Result};

#[test]
fn data_through_buffered_pipe() {
    let (out, input) = byte_pipe(64).unwrap();
    let writer = thread::spawn(move || -> Result<()> {
        let mut data = DataOutputStream::new(BufferedOutputStream::new(out));
        for i in 0..1000 {
            data.write_int(i)?;
        }
        data.write_double(0.5)?;
        data.write_utf("done")?;
        data.close()
    });

    let mut data = DataInputStream::new(BufferedInputStream::new(input));
    for i in 0..1000 {
        assert_eq!(data.read_int().unwrap(), i);
    }
    assert_eq!(data.read_double().unwrap(), 0.5);
    assert_eq!(data.read_utf().unwrap(), "done");
    writer.join().unwrap().unwrap();
    assert!(matches!(data.read_i8(), Err(IoError::UnexpectedEof)));
}

#[test]
fn object_graph_through_pipe() {
    let desc = ClassDesc::builder("demo.Link")
        .suid(9)
        .primitive("n", TypeCode::Int)
        .object("next", "Ldemo/Link;")
        .build()
        .unwrap();

    let (out, input) = byte_pipe(128).unwrap();
    let writer_desc = Arc::clone(&desc);
    let writer = thread::spawn(move || -> Result<()> {
        let mut head = Value::Null;
        for n in 0..50 {
            let link = Instance::new(Arc::clone(&writer_desc));
            link.set("n", n)?;
            link.set("next", head)?;
            head = Value::Object(link);
        }
        let mut objects = ObjectOutputStream::new(out)?;
        objects.write_object(&head)?;
        objects.write_object(&head)?;
        objects.close()
    });

    let mut objects = ObjectInputStream::new(input).unwrap();
    let head = objects.read_object().unwrap();
    let again = objects.read_object().unwrap();
    assert_eq!(head, again);
    let mut count = 0;
    let mut cur = head;
    while let Some(link) = cur.as_object().cloned() {
        assert_eq!(link.get("n"), Some(Value::Int(49 - count)));
        count += 1;
        cur = link.get("next").unwrap_or(Value::Null);
    }
    assert_eq!(count, 50);
    writer.join().unwrap().unwrap();
}

#[test]
fn pushback_lets_a_header_be_sniffed() {
    let mut input = PushbackInputStream::with_capacity(
        ByteArrayInputStream::new(vec![0xAC, 0xED, 0x00, 0x05]),
        2,
    )
    .unwrap();
    let mut magic = [0u8; 2];
    input.read_exact(&mut magic).unwrap();
    assert_eq!(magic, [0xAC, 0xED]);
    input.unread_slice(&magic).unwrap();
    assert!(matches!(input.unread(0), Err(IoError::PushbackOverflow)));

    let mut data = DataInputStream::new(input);
    assert_eq!(data.read_unsigned_short().unwrap(), 0xACED);
    assert_eq!(data.read_unsigned_short().unwrap(), 5);
}

#[test]
fn line_numbers_follow_every_terminator() {
    let mut lines = LineNumberReader::new(StringReader::new("one\ntwo\r\nthree\rfour"));
    let mut seen = Vec::new();
    while let Some(line) = lines.read_line().unwrap() {
        seen.push((lines.line_number(), line));
    }
    assert_eq!(
        seen,
        [
            (1, "one".to_string()),
            (2, "two".to_string()),
            (3, "three".to_string()),
            (4, "four".to_string()),
        ]
    );
}

struct Descriptor {
    releases: Arc<AtomicUsize>,
    fail: bool,
}

impl Release for Descriptor {
    fn release(&mut self) -> Result<()> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(IoError::Os(std::io::Error::other("release failed")))
        } else {
            Ok(())
        }
    }
}

#[test]
fn last_attachment_releases() {
    let releases = Arc::new(AtomicUsize::new(0));
    let shared = SharedResource::new(Descriptor {
        releases: Arc::clone(&releases),
        fail: false,
    });
    let a = shared.attach().unwrap();
    let b = shared.attach().unwrap();
    assert_eq!(shared.attached(), 2);
    a.release().unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 0);
    b.release().unwrap();
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(shared.is_released());
    assert!(matches!(shared.attach(), Err(IoError::Closed)));
}

#[test]
fn close_all_collects_every_failure() {
    let releases = Arc::new(AtomicUsize::new(0));
    let shared = SharedResource::new(Descriptor {
        releases: Arc::clone(&releases),
        fail: true,
    });
    let attachment = shared.attach().unwrap();
    shared
        .on_close_all(|| Err(IoError::IllegalState("first closer")))
        .unwrap();
    shared.on_close_all(|| Ok(())).unwrap();
    let err = shared.close_all().unwrap_err();
    assert!(matches!(err.root(), IoError::IllegalState("first closer")));
    assert_eq!(err.suppressed().len(), 1);
    assert_eq!(releases.load(Ordering::SeqCst), 1);
    assert!(matches!(attachment.with(|_| ()), Err(IoError::Closed)));
    attachment.release().unwrap();
    shared.close_all().unwrap();
}
