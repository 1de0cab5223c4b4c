use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use romcart::{
    Address, Allocator, GrowthManager, PatchRegistry, PointerRef, RomImage, Window, MIN_IMAGE_SIZE,
};

/// 4 MiB image with used bytes scattered over it, leaving small free gaps
fn fragmented_image(seed: u64) -> RomImage {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut data = vec![0u8; MIN_IMAGE_SIZE as usize];
    let mut at = 0;
    while at < data.len() {
        let used = rng.gen_range(0x40..0x400).min(data.len() - at);
        data[at..at + used].fill(0xC3);
        at += used + rng.gen_range(0x10..0x200);
    }
    RomImage::from_bytes("bench.gba", data).unwrap()
}

fn bench_placement(c: &mut Criterion) {
    let mut group = c.benchmark_group("placement");
    let allocator = Allocator::default();
    let pointer = PointerRef::at_offset(0x100);

    for len in [0x20usize, 0x100, 0x400, 0x1000] {
        group.bench_with_input(BenchmarkId::new("fragmented", len), &len, |b, &len| {
            let data = vec![0x5A; len];
            b.iter_batched(
                || fragmented_image(7),
                |mut image| {
                    black_box(
                        allocator
                            .place(&mut image, &data, &[pointer], Window::image())
                            .unwrap(),
                    )
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.bench_function("bounded_window", |b| {
        let data = vec![0x5A; 0x80];
        let window = Window::bounded(Address::from_offset(0x20_0000), Address::from_offset(0x30_0000));
        b.iter_batched(
            || fragmented_image(11),
            |mut image| black_box(allocator.place(&mut image, &data, &[pointer], window).unwrap()),
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("growth");
    let allocator = Allocator::default();
    let growth = GrowthManager::default();
    let pointer = PointerRef::at_offset(0x100);

    // Full image: every placement has to grow first
    group.bench_function("place_after_growth", |b| {
        let data = vec![0x5A; 0x1000];
        b.iter_batched(
            || RomImage::from_bytes("bench.gba", vec![0xFF; MIN_IMAGE_SIZE as usize]).unwrap(),
            |mut image| {
                black_box(
                    growth
                        .place(&allocator, &mut image, &data, &[pointer], Window::image())
                        .unwrap(),
                )
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("single_step", |b| {
        b.iter_batched(
            || RomImage::from_bytes("bench.gba", vec![0xFF; MIN_IMAGE_SIZE as usize]).unwrap(),
            |mut image| black_box(growth.grow(&mut image).unwrap()),
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn bench_detection(c: &mut Criterion) {
    let registry = PatchRegistry::builtin().unwrap();
    let image = fragmented_image(3);

    c.bench_function("detect_all", |b| {
        b.iter(|| black_box(registry.detect_all(&image)))
    });
}

criterion_group!(benches, bench_placement, bench_growth, bench_detection);
criterion_main!(benches);
