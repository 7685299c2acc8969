//! # HTTP2CoAP Translation Benchmarks
//!
//! | Path | What is measured |
//! |------|------------------|
//! | request | HTTP method/target/body to a sorted CoAP request |
//! | options | URL to Uri-Path / Uri-Query options only |
//! | response | CoAP response to status, headers and body |
//! | codec | wire encode and decode of a request datagram |

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use http2coap_gateway::adapters::codec;
use http2coap_gateway::domain::request::build_options;
use http2coap_gateway::domain::{
    CoapOption, CoapResponse, MessageId, MessageType, RequestTranslator, ResponseCode,
    ResponseTranslator, Token,
};

fn bench_request_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("request");
    group.measurement_time(Duration::from_secs(5));

    let translator = RequestTranslator::new(4, 1024);
    let targets = [
        ("root", "/"),
        ("short", "/sensors/temp"),
        ("query", "/sensors/temp?unit=c&precision=2"),
        ("encoded", "/living%20room/lamp%2F1/state?on=1&ramp=250ms&scene=warm%20white"),
    ];

    for (name, target) in targets {
        group.bench_with_input(BenchmarkId::new("translate_get", name), &target, |b, t| {
            b.iter(|| black_box(translator.translate("GET", t, b"", |_| false).is_ok()))
        });
        group.bench_with_input(BenchmarkId::new("build_options", name), &target, |b, t| {
            b.iter(|| black_box(build_options(t).map(|o| o.len())))
        });
    }

    for size in [16usize, 256, 1024] {
        let body = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("translate_post", size), &body, |b, body| {
            b.iter(|| black_box(translator.translate("POST", "/upload", body, |_| false).is_ok()))
        });
    }

    group.finish();
}

fn bench_response_translation(c: &mut Criterion) {
    let mut group = c.benchmark_group("response");

    let json = CoapResponse {
        code: ResponseCode::CONTENT,
        message_type: MessageType::Acknowledgement,
        message_id: MessageId(0x1234),
        token: Token::new(vec![1, 2, 3, 4]).unwrap_or_else(Token::empty),
        options: vec![CoapOption::new(12, vec![50])],
        payload: br#"{"t":21.5,"h":40}"#.to_vec(),
    };
    let not_found = CoapResponse {
        code: ResponseCode::NOT_FOUND,
        options: Vec::new(),
        payload: Vec::new(),
        ..json.clone()
    };

    group.bench_function("content_json", |b| {
        b.iter(|| black_box(ResponseTranslator.translate(&json).is_ok()))
    });
    group.bench_function("not_found_empty", |b| {
        b.iter(|| black_box(ResponseTranslator.translate(&not_found).is_ok()))
    });

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    let translator = RequestTranslator::new(4, 1024);
    let request = translator
        .translate("PUT", "/actuators/relay?state=on", b"on", |_| false)
        .unwrap();
    let datagram = codec::encode_request(&request, 1152).unwrap();

    group.bench_function("encode_request", |b| {
        b.iter(|| black_box(codec::encode_request(&request, 1152).is_ok()))
    });
    group.bench_function("decode", |b| {
        b.iter(|| black_box(codec::decode(&datagram).is_ok()))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_request_translation,
    bench_response_translation,
    bench_codec
);
criterion_main!(benches);
