//! Preset-dictionary flows: zlib NEED_DICT negotiation and raw-mode
//! window priming.

#![cfg(feature = "software")]

use nxz::{Compression, Deflate, Device, Error, FlushCompress, FlushDecompress, Inflate, Status, Wrap};
use std::convert::TryInto;

const DICT: &[u8] = b"a moderately long shared dictionary with recurring phrases, \
recurring phrases that the payload below repeats almost verbatim. \
0123456789abcdefghijklmnopqrstuvwxyz";

const PAYLOAD: &[u8] = b"the payload below repeats almost verbatim what the \
shared dictionary said: recurring phrases, recurring phrases.";

fn finish(d: &mut Deflate, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 1 << 16];
    let mut out = Vec::new();
    let mut input = data;
    loop {
        let before_in = d.total_in();
        let before_out = d.total_out();
        let status = d.deflate(input, &mut buf, FlushCompress::Finish).unwrap();
        out.extend_from_slice(&buf[..(d.total_out() - before_out) as usize]);
        input = &input[(d.total_in() - before_in) as usize..];
        if status == Status::StreamEnd {
            return out;
        }
    }
}

#[test]
fn zlib_dictionary_round_trip() {
    let dev = Device::software();

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let dict_id = d.set_dictionary(DICT).unwrap();
    let compressed = finish(&mut d, PAYLOAD);

    // FDICT must be visible in the header together with the id
    assert_ne!(compressed[1] & 0x20, 0);
    assert_eq!(
        u32::from_be_bytes(compressed[2..6].try_into().unwrap()),
        dict_id
    );

    // without the dictionary, decompression must ask for it by id
    let mut i = Inflate::new(&dev, Wrap::Zlib).unwrap();
    let mut buf = vec![0u8; 4096];
    match i.inflate(&compressed, &mut buf, FlushDecompress::None) {
        Err(Error::NeedDict(id)) => assert_eq!(id, dict_id),
        other => panic!("expected NeedDict, got {:?}", other),
    }

    // supplying it resumes the stream
    i.set_dictionary(DICT).unwrap();
    let consumed = i.total_in() as usize;
    let status = i
        .inflate(&compressed[consumed..], &mut buf, FlushDecompress::Finish)
        .unwrap();
    assert_eq!(status, Status::StreamEnd);
    assert_eq!(&buf[..i.total_out() as usize], PAYLOAD);
}

#[test]
fn zlib_wrong_dictionary_is_rejected() {
    let dev = Device::software();
    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    d.set_dictionary(DICT).unwrap();
    let compressed = finish(&mut d, PAYLOAD);

    let mut i = Inflate::new(&dev, Wrap::Zlib).unwrap();
    let mut buf = vec![0u8; 4096];
    assert!(matches!(
        i.inflate(&compressed, &mut buf, FlushDecompress::None),
        Err(Error::NeedDict(_))
    ));
    assert!(matches!(
        i.set_dictionary(b"not the right dictionary"),
        Err(Error::Data(_))
    ));
}

#[test]
fn raw_dictionary_round_trip() {
    let dev = Device::software();

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Raw).unwrap();
    d.set_dictionary(DICT).unwrap();
    let compressed = finish(&mut d, PAYLOAD);

    let mut i = Inflate::new(&dev, Wrap::Raw).unwrap();
    i.set_dictionary(DICT).unwrap();
    let mut buf = vec![0u8; 4096];
    let status = i
        .inflate(&compressed, &mut buf, FlushDecompress::Finish)
        .unwrap();
    assert_eq!(status, Status::StreamEnd);
    assert_eq!(&buf[..i.total_out() as usize], PAYLOAD);
}

#[test]
fn dictionary_improves_compression() {
    let dev = Device::software();

    let mut with_dict = Deflate::new(&dev, Compression::default(), Wrap::Raw).unwrap();
    with_dict.set_dictionary(DICT).unwrap();
    let c1 = finish(&mut with_dict, PAYLOAD);

    let mut without = Deflate::new(&dev, Compression::default(), Wrap::Raw).unwrap();
    let c2 = finish(&mut without, PAYLOAD);

    assert!(c1.len() <= c2.len());
}

#[test]
fn gzip_rejects_dictionaries() {
    let dev = Device::software();
    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Gzip).unwrap();
    assert!(matches!(d.set_dictionary(DICT), Err(Error::Stream(_))));

    let mut i = Inflate::new(&dev, Wrap::Gzip).unwrap();
    assert!(matches!(i.set_dictionary(DICT), Err(Error::Stream(_))));
}

#[test]
fn zlib_dictionary_after_first_call_is_rejected() {
    let dev = Device::software();
    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let mut buf = vec![0u8; 1024];
    d.deflate(b"some data", &mut buf, FlushCompress::Sync).unwrap();
    assert!(matches!(d.set_dictionary(DICT), Err(Error::Stream(_))));
}
