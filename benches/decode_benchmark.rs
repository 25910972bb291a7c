use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use solar_modbus::util::decode_hex;
use solar_modbus::{decode_frame, Device, DeviceConfig, PluginRegistry, ProtocolDescriptor};

fn protocol(id: &str) -> ProtocolDescriptor {
    let path = format!("{}/protocols/{id}.json", env!("CARGO_MANIFEST_DIR"));
    ProtocolDescriptor::from_file(path).unwrap()
}

fn benchmark_decode_frame(c: &mut Criterion) {
    let desc = protocol("pzem_v04");
    let data = decode_hex("01040000000A08FC000001F40000007300000400 01F400640000").unwrap();

    c.bench_function("decode_frame", |b| {
        b.iter(|| {
            let result = decode_frame(black_box(&data), &desc);
            let _ = black_box(result);
        })
    });
}

fn benchmark_byte_addressed(c: &mut Criterion) {
    let desc = protocol("jkbms");
    let mut data = vec![0x0F, 0x03, 0x12, 0x00, 0x00, 0x80];
    data.extend((0..128u8).map(|i| i.wrapping_mul(7)));

    c.bench_function("decode_frame_byte_addressing", |b| {
        b.iter(|| {
            let result = decode_frame(black_box(&data), &desc);
            let _ = black_box(result);
        })
    });
}

fn benchmark_process_frame(c: &mut Criterion) {
    let registry = PluginRegistry::with_defaults().unwrap();
    let device = Device::new(
        &DeviceConfig::new("BENCH", "MakeSkyBlue"),
        Arc::new(protocol("makeskyblue")),
        &registry,
    )
    .unwrap();
    let mut data = vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x24];
    data.extend((0..0x24u16).flat_map(|i| (i * 3).to_be_bytes()));

    c.bench_function("process_frame_makeskyblue", |b| {
        b.iter(|| {
            let result = device.process_frame(black_box(&data));
            let _ = black_box(result);
        })
    });
}

criterion_group!(
    benches,
    benchmark_decode_frame,
    benchmark_byte_addressed,
    benchmark_process_frame
);
criterion_main!(benches);
