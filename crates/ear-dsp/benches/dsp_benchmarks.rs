//! Adaptive core benchmarks
//!
//! Per-callback cost of the pieces that run on the audio thread.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use ear_core::{AdaptationSettings, EarConfig, ProcessBuffers, SampleRate};
use ear_dsp::fft::MagnitudeAnalyzer;
use ear_dsp::{AdaptationEngine, Equalizer, Processor, ReferenceHistory};

const SAMPLE_RATE: f64 = 48000.0;
const BLOCK_SIZES: &[usize] = &[64, 256, 1024, 4096];

fn generate_test_audio(samples: usize) -> Vec<f64> {
    (0..samples)
        .map(|i| {
            let t = i as f64 / SAMPLE_RATE;
            (2.0 * std::f64::consts::PI * 440.0 * t).sin() * 0.5
        })
        .collect()
}

fn bench_equalizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("Equalizer");

    for &block_size in BLOCK_SIZES {
        group.bench_with_input(
            BenchmarkId::new("process", block_size),
            &block_size,
            |b, &size| {
                let input = generate_test_audio(size);
                let mut output = vec![0.0; size];
                let mut eq = Equalizer::new(2048, 100);
                b.iter(|| eq.process(black_box(&input), &mut output));
            },
        );
    }

    group.bench_function("generate_filter_2048", |b| {
        let mut eq = Equalizer::new(2048, 100);
        b.iter(|| eq.generate_filter());
    });

    group.finish();
}

fn bench_analysis(c: &mut Criterion) {
    let input = generate_test_audio(4096);
    let mut magnitudes = vec![0.0; 2048];
    let mut analyzer = MagnitudeAnalyzer::new();

    c.bench_function("magnitude_4096", |b| {
        b.iter(|| analyzer.analyze(black_box(&input), &mut magnitudes));
    });
}

fn bench_adaptation(c: &mut Criterion) {
    let input = generate_test_audio(1024);
    let mut history = ReferenceHistory::new(48000);
    history.push(&generate_test_audio(8192));
    let mut engine = AdaptationEngine::new(AdaptationSettings::default());
    let mut eq = Equalizer::new(2048, 100);

    c.bench_function("adaptation_step_1024", |b| {
        b.iter(|| engine.update_controls(black_box(&input), &history, 1000, &mut eq));
    });
}

fn bench_processor(c: &mut Criterion) {
    let mut group = c.benchmark_group("Processor");

    for &block_size in BLOCK_SIZES {
        group.bench_with_input(
            BenchmarkId::new("rectify", block_size),
            &block_size,
            |b, &size| {
                let (mut processor, _handle, _events) =
                    Processor::new(&EarConfig::default(), SampleRate::Hz48000).unwrap();
                let microphone = generate_test_audio(size);
                let reference = generate_test_audio(size);
                let mut out_l = vec![0.0; size];
                let mut out_r = vec![0.0; size];

                b.iter(|| {
                    processor.process(ProcessBuffers {
                        microphone_left: black_box(&microphone),
                        microphone_right: &microphone,
                        reference_left: &reference,
                        reference_right: &reference,
                        output_left: &mut out_l,
                        output_right: &mut out_r,
                    })
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_equalizer,
    bench_analysis,
    bench_adaptation,
    bench_processor
);
criterion_main!(benches);
