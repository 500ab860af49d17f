//! Flush-marker behavior: byte alignment, mid-stream decodability, and
//! multi-call finishes through tight buffers.

#![cfg(feature = "software")]

use nxz::{
    Compression, Deflate, Device, FlushCompress, FlushDecompress, Inflate, Status, Wrap,
};

/// Compress `pieces` with the given flush after each piece, then `Finish`.
fn deflate_pieces(d: &mut Deflate, pieces: &[&[u8]], flush: FlushCompress) -> Vec<u8> {
    let mut buf = vec![0u8; 1 << 16];
    let mut out = Vec::new();
    for piece in pieces {
        let mut input = *piece;
        loop {
            let before_in = d.total_in();
            let before_out = d.total_out();
            d.deflate(input, &mut buf, flush).unwrap();
            out.extend_from_slice(&buf[..(d.total_out() - before_out) as usize]);
            input = &input[(d.total_in() - before_in) as usize..];
            if input.is_empty() {
                break;
            }
        }
    }
    loop {
        let before_out = d.total_out();
        let status = d.deflate(&[], &mut buf, FlushCompress::Finish).unwrap();
        out.extend_from_slice(&buf[..(d.total_out() - before_out) as usize]);
        if status == Status::StreamEnd {
            return out;
        }
    }
}

fn inflate_to_end(i: &mut Inflate, mut input: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; 1 << 16];
    let mut out = Vec::new();
    loop {
        let before_in = i.total_in();
        let before_out = i.total_out();
        let status = i.inflate(input, &mut buf, FlushDecompress::None).unwrap();
        out.extend_from_slice(&buf[..(i.total_out() - before_out) as usize]);
        input = &input[(i.total_in() - before_in) as usize..];
        if status == Status::StreamEnd {
            return out;
        }
    }
}

#[test]
fn sync_flush_keeps_the_stream_decodable() {
    let dev = Device::software();
    let pieces: [&[u8]; 3] = [b"first part ", b"second part ", b"third part"];

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let compressed = deflate_pieces(&mut d, &pieces, FlushCompress::Sync);

    let mut i = Inflate::new(&dev, Wrap::Zlib).unwrap();
    let plain = inflate_to_end(&mut i, &compressed);
    assert_eq!(plain, pieces.concat());
}

#[test]
fn sync_flushed_prefix_is_immediately_available() {
    let dev = Device::software();
    let part = b"available right away";

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Raw).unwrap();
    let mut buf = vec![0u8; 4096];
    d.deflate(part, &mut buf, FlushCompress::Sync).unwrap();
    let flushed = &buf[..d.total_out() as usize];

    // a sync flush ends on a byte boundary with an empty stored block, so
    // the decoder can recover the full prefix without seeing the finish
    assert_eq!(&flushed[flushed.len() - 4..], &[0x00, 0x00, 0xff, 0xff]);

    let mut i = Inflate::new(&dev, Wrap::Raw).unwrap();
    let mut out = vec![0u8; 4096];
    i.inflate(flushed, &mut out, FlushDecompress::Sync).unwrap();
    assert_eq!(&out[..i.total_out() as usize], part);
}

#[test]
fn partial_flush_round_trip() {
    let dev = Device::software();
    let pieces: [&[u8]; 3] = [b"alpha ", b"beta ", b"gamma"];

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let compressed = deflate_pieces(&mut d, &pieces, FlushCompress::Partial);

    let mut i = Inflate::new(&dev, Wrap::Zlib).unwrap();
    let plain = inflate_to_end(&mut i, &compressed);
    assert_eq!(plain, pieces.concat());
}

#[test]
fn full_flush_round_trip() {
    let dev = Device::software();
    let pieces: [&[u8]; 2] = [b"window resets here ", b"and this still decodes"];

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Gzip).unwrap();
    let compressed = deflate_pieces(&mut d, &pieces, FlushCompress::Full);

    let mut i = Inflate::new(&dev, Wrap::Gzip).unwrap();
    let plain = inflate_to_end(&mut i, &compressed);
    assert_eq!(plain, pieces.concat());
}

#[test]
fn finish_through_one_byte_output_buffers() {
    let dev = Device::software();
    let data = b"squeezed through a keyhole".repeat(20);

    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let mut out = Vec::new();
    let mut buf = [0u8; 1];
    let mut input = &data[..];
    // hundreds of calls, one output byte at a time
    for _ in 0..100_000 {
        let before_in = d.total_in();
        let before_out = d.total_out();
        let status = d.deflate(input, &mut buf, FlushCompress::Finish).unwrap();
        input = &input[(d.total_in() - before_in) as usize..];
        if d.total_out() > before_out {
            out.push(buf[0]);
        }
        if status == Status::StreamEnd {
            break;
        }
    }

    let mut i = Inflate::new(&dev, Wrap::Zlib).unwrap();
    let plain = inflate_to_end(&mut i, &out);
    assert_eq!(plain, data);
}

#[test]
fn empty_input_flushes_are_polite() {
    let dev = Device::software();
    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let mut buf = [0u8; 64];
    // nothing buffered: flush requests are a no-op, not an error
    assert_eq!(
        d.deflate(&[], &mut buf, FlushCompress::Sync).unwrap(),
        Status::Ok
    );
    assert_eq!(
        d.deflate(&[], &mut buf, FlushCompress::None).unwrap(),
        Status::BufError
    );
}

#[test]
fn empty_stream_finish_emits_valid_framing() {
    let dev = Device::software();
    for wrap in [Wrap::Zlib, Wrap::Gzip, Wrap::Raw] {
        let mut d = Deflate::new(&dev, Compression::default(), wrap).unwrap();
        let mut buf = vec![0u8; 64];
        let status = d.deflate(&[], &mut buf, FlushCompress::Finish).unwrap();
        assert_eq!(status, Status::StreamEnd);
        let compressed = &buf[..d.total_out() as usize];

        let mut i = Inflate::new(&dev, wrap).unwrap();
        let mut out = vec![0u8; 64];
        let status = i
            .inflate(compressed, &mut out, FlushDecompress::Finish)
            .unwrap();
        assert_eq!(status, Status::StreamEnd);
        assert_eq!(i.total_out(), 0);
    }
}

#[test]
fn stream_end_is_reported_exactly_once() {
    let dev = Device::software();
    let mut d = Deflate::new(&dev, Compression::default(), Wrap::Zlib).unwrap();
    let mut buf = vec![0u8; 4096];
    let status = d.deflate(b"once", &mut buf, FlushCompress::Finish).unwrap();
    assert_eq!(status, Status::StreamEnd);
    let status = d.deflate(&[], &mut buf, FlushCompress::Finish).unwrap();
    assert_eq!(status, Status::BufError);
}
