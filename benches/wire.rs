use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use udpx::crypto::generate_key;
use udpx::{Digest, FragmentBuilder, FragmentHeader, Packet, Pipeline, DEFAULT_PAYLOAD_SIZE};

fn bench_fragment_build(c: &mut Criterion) {
    let data = vec![0xAB; 1024 * 1024];
    let digest = Digest::of(&data);

    let mut group = c.benchmark_group("fragment_build");
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("1MiB_default_payload", |b| {
        let builder = FragmentBuilder::new(DEFAULT_PAYLOAD_SIZE);
        b.iter(|| builder.build(black_box("bench/item"), &digest, black_box(&data)))
    });

    group.finish();
}

fn bench_header_parse(c: &mut Criterion) {
    let digest = Digest::of(b"item");
    let datagram = Packet::encode_fragment("bench/item name", &digest, 41, 1024, &[0x42; 1024]);

    let mut group = c.benchmark_group("header_parse");
    group.throughput(Throughput::Bytes(datagram.len() as u64));

    group.bench_function("fragment_header", |b| {
        b.iter(|| FragmentHeader::parse(black_box(&datagram)))
    });
    group.bench_function("packet_from_bytes", |b| {
        b.iter(|| Packet::from_bytes(black_box(&datagram)))
    });

    group.finish();
}

fn bench_seal_open(c: &mut Criterion) {
    let pipeline = Pipeline::new(&generate_key()).unwrap();
    let datagram = Packet::encode_fragment("bench", &Digest::of(b"x"), 0, 1, &[0x5A; 1024]);
    let sealed = pipeline.seal(&datagram).unwrap();

    let mut group = c.benchmark_group("seal_open");
    group.throughput(Throughput::Bytes(datagram.len() as u64));

    group.bench_function("seal", |b| b.iter(|| pipeline.seal(black_box(&datagram))));
    group.bench_function("open", |b| b.iter(|| pipeline.open(black_box(&sealed))));
    group.bench_function("confirmation_digest", |b| {
        b.iter(|| Digest::of(black_box(&datagram)))
    });

    group.finish();
}

criterion_group!(benches, bench_fragment_build, bench_header_parse, bench_seal_open);
criterion_main!(benches);
