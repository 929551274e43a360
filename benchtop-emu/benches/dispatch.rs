use benchtop_emu::{reply, Emulator, Instrument, Options, RouteBuilder};
use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;

#[derive(Default)]
struct Bench {
    value: f64,
    options: Options,
}

impl Emulator for Bench {
    const NAME: &'static str = "bench";

    fn declare(routes: RouteBuilder<Self>) -> RouteBuilder<Self> {
        let mut routes = routes.case_insensitive();
        for i in 0..32 {
            let pattern = format!(r"CHAN{i}:VAL(?:UE)? ([-+0-9.eE]+)");
            routes = routes.route(pattern, |s, args| {
                s.value = args.parse(0).unwrap_or(s.value);
                None
            });
        }
        routes
            .route(r"VAL(?:UE)?\?", |s, _| reply(s.value))
            .fallback(|_, _| None)
    }

    fn reset(&mut self) {
        self.value = 0.0;
    }

    fn options(&self) -> &Options {
        &self.options
    }
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let mut dev = Instrument::new(Bench::default()).unwrap();
    c.bench_function("dispatch_query", |b| {
        b.iter(|| dev.handle(black_box("VALUE?")))
    });
    c.bench_function("dispatch_deep_match", |b| {
        b.iter(|| dev.handle(black_box("chan31:value 1.5e3")))
    });
    c.bench_function("dispatch_fallback", |b| {
        b.iter(|| dev.handle(black_box("NOT:A:COMMAND")))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
