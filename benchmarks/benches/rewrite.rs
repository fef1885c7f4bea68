//! Benchmarks fmthook (Criterion)
//!
//! Paramètres via env :
//!   - CRIT_SAMPLES      (def=50)
//!   - CRIT_WARMUP_MS    (def=300)
//!   - CRIT_MEASURE_MS   (def=1000)
//!
//! Suites :
//!   - rewrite/units   → réécriture seule, corpus de taille croissante
//!   - rewrite/codec   → décodage + ré-encodage sans opération de formatage
//!   - run/native|hook → même programme, formatage natif vs hook injecté

use std::{fs, rc::Rc, time::Duration};

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use fmthook_benches::{synthetic_calls, synthetic_program};
use fmthook_compiler::compile_source;
use fmthook_core::bytecode::Bytecode;
use fmthook_loader::{LaunchMode, Launcher, LoaderConfig};
use fmthook_rewrite::{count_format_ops, Rewriter};
use fmthook_vm::{Module, Vm};

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}
fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

fn configure(c: Criterion) -> Criterion {
    c.sample_size(env_usize("CRIT_SAMPLES", 50))
        .warm_up_time(Duration::from_millis(env_u64("CRIT_WARMUP_MS", 300)))
        .measurement_time(Duration::from_millis(env_u64("CRIT_MEASURE_MS", 1000)))
}

// ---- Réécriture ------------------------------------------------------------

fn bench_rewrite(c: &mut Criterion) {
    let mut g = c.benchmark_group("rewrite/units");
    for n in [8usize, 64, 256] {
        let chunk = Rc::new(compile_source(&synthetic_program(n, 6), None).expect("corpus"));
        g.throughput(Throughput::Elements(count_format_ops(&chunk) as u64));
        g.bench_with_input(BenchmarkId::from_parameter(n), &chunk, |b, chunk| {
            b.iter(|| {
                let mut rw = Rewriter::default();
                black_box(rw.rewrite_chunk(black_box(chunk)).expect("rewrite"))
            });
        });
    }
    g.finish();

    let plain = compile_source("let a = 1;\nlet b = a + 2;\nprint(a, b);\n", None).expect("plain");
    c.bench_function("rewrite/codec", |b| {
        b.iter(|| {
            let decoded = Bytecode::from_chunk(black_box(&plain)).expect("decode");
            black_box(decoded.to_chunk().expect("encode"))
        });
    });
}

// ---- Exécution -------------------------------------------------------------

fn bench_run(c: &mut Criterion) {
    let src = synthetic_program(16, 6) + &synthetic_calls(16);
    let native = Rc::new(compile_source(&src, None).expect("corpus"));

    let mut g = c.benchmark_group("run");
    g.bench_function("native", |b| {
        b.iter(|| {
            let (mut vm, out) = Vm::with_captured_stdout();
            let module = Rc::new(Module::new("__main__", None));
            vm.run_module(&native, &module).expect("run");
            out.clear();
        });
    });

    let dir = tempfile::tempdir().expect("tempdir");
    let entry = dir.path().join("main.fh");
    fs::write(&entry, format!("install();\n{src}")).expect("write");
    for (name, mode) in [("hook/bootstrap", LaunchMode::Bootstrap), ("hook/eager", LaunchMode::Eager)] {
        let launcher = Launcher::new(LoaderConfig::for_project(dir.path())).mode(mode);
        g.bench_function(name, |b| {
            b.iter(|| {
                let (mut vm, _out) = Vm::with_captured_stdout();
                black_box(launcher.run(&mut vm, &entry).expect("launch").exit_code)
            });
        });
    }
    g.finish();
}

criterion_group! {
    name = benches;
    config = configure(Criterion::default());
    targets = bench_rewrite, bench_run
}
criterion_main!(benches);
