//! Codec benchmarks: encode/decode throughput for typical message shapes.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use msp_proto::codes::{field, msg};
use msp_proto::{decode, encode, Message};

fn push_message() -> Message {
    let mut message = Message::new(msg::PUSH_DATA, 7);
    message.set_int32(field::ITEM_COUNT, 16);
    for i in 0..16u32 {
        let base = field::PUSH_DATA_BASE + i * field::PUSH_ITEM_STRIDE;
        message.set_text(base, format!("device-{i}"));
        message.set_text(base + 1, "cpu.load");
        message.set_text(base + 2, "0.42");
    }
    message
}

fn file_chunk() -> Message {
    let mut message = Message::new(msg::FILE_DATA, 9);
    message.set_binary_data(vec![0xA5u8; 128 * 1024]);
    message
}

fn bench_encode(c: &mut Criterion) {
    let push = push_message();
    c.bench_function("encode_push_message", |b| {
        b.iter(|| encode(black_box(&push), false))
    });

    let chunk = file_chunk();
    c.bench_function("encode_file_chunk", |b| {
        b.iter(|| encode(black_box(&chunk), false))
    });

    c.bench_function("encode_file_chunk_compressed", |b| {
        b.iter(|| encode(black_box(&chunk), true))
    });
}

fn bench_decode(c: &mut Criterion) {
    let push = encode(&push_message(), false);
    c.bench_function("decode_push_message", |b| {
        b.iter(|| decode(black_box(&push)).unwrap())
    });

    let chunk = encode(&file_chunk(), false);
    c.bench_function("decode_file_chunk", |b| {
        b.iter(|| decode(black_box(&chunk)).unwrap())
    });
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
