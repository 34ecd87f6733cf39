use qpack::decoder::{Decoder, DecoderOpts, HeaderStatus};
use qpack::encoder::{EncodeFlags, EncoderOpts, Encoder};

fn roundtrip_block(
    enc: &mut Encoder,
    dec: &mut Decoder,
    stream_id: u64,
    fields: &[(&[u8], &[u8])],
) -> Vec<(Vec<u8>, Vec<u8>)> {
    enc.start_header(stream_id).unwrap();

    let mut all_enc = Vec::new();
    let mut hdr_body = Vec::new();
    for (name, value) in fields {
        let mut enc_buf = [0u8; 512];
        let mut enc_len = 0;
        let mut hdr_buf = [0u8; 512];
        let mut hdr_len = 0;
        enc.encode(&mut enc_buf, &mut enc_len, &mut hdr_buf, &mut hdr_len, name, value, EncodeFlags::empty())
            .unwrap();
        all_enc.extend_from_slice(&enc_buf[..enc_len]);
        hdr_body.extend_from_slice(&hdr_buf[..hdr_len]);
    }

    let mut prefix_buf = [0u8; 64];
    let mut prefix_len = 0;
    enc.end_header(&mut prefix_buf, &mut prefix_len).unwrap();

    if !all_enc.is_empty() {
        dec.enc_in(&all_enc).unwrap();
    }

    let mut full_block = prefix_buf[..prefix_len].to_vec();
    full_block.extend_from_slice(&hdr_body);

    let decoded = match dec.header_read(stream_id, &full_block).unwrap() {
        HeaderStatus::Done(fields) => fields,
        status => panic!("expected Done, got {:?}", status),
    };

    let mut dec_out = [0u8; 256];
    let n = dec.drain_decoder_stream(&mut dec_out);
    if n > 0 {
        enc.decoder_in(&dec_out[..n]).unwrap();
    }

    decoded.into_iter().map(|f| (f.name, f.value)).collect()
}

#[test]
fn request_headers_round_trip_across_several_streams() {
    let mut dec_buf = [0u8; 64];
    let (mut enc, n) = Encoder::new(4096, 4096, 10, EncoderOpts::empty(), &mut dec_buf).unwrap();
    let mut dec = Decoder::new(4096, 10, DecoderOpts::empty());
    if n > 0 {
        dec.enc_in(&dec_buf[..n]).unwrap();
    }

    let requests: Vec<Vec<(&[u8], &[u8])>> = vec![
        vec![(b":method".as_slice(), b"GET".as_slice()), (b":path".as_slice(), b"/".as_slice())],
        vec![(b":method".as_slice(), b"GET".as_slice()), (b":path".as_slice(), b"/".as_slice())],
        vec![(b"x-custom".as_slice(), b"value".as_slice())],
        vec![(b"x-custom".as_slice(), b"value".as_slice())],
    ];

    for (i, fields) in requests.iter().enumerate() {
        let decoded = roundtrip_block(&mut enc, &mut dec, i as u64, fields);
        let expected: Vec<(Vec<u8>, Vec<u8>)> =
            fields.iter().map(|(n, v)| (n.to_vec(), v.to_vec())).collect();
        assert_eq!(decoded, expected, "stream {} mismatch", i);
    }

    assert_eq!(enc.dyn_table().insert_count(), dec.dyn_table().insert_count());
}
