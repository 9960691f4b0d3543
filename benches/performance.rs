use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use socket2::{Domain, Socket, Type};
use std::os::fd::AsRawFd;
use std::time::Duration;
use uda_client::core::resolver::{classify_host, is_numeric_ipv4};
use uda_client::{
    HostDirectory, HostEntry, HostList, HostTarget, SessionState, SessionType, SocketRegistry,
};

/// 创建测试主机目录
fn create_host_list(size: usize) -> HostList {
    let entries = (0..size)
        .map(|i| {
            HostEntry::new(
                &format!("alias_{}", i),
                &format!("uda{}.example.org", i),
                Some(56565 + (i % 100) as u16),
            )
        })
        .collect();
    HostList::from_entries(entries)
}

/// 主机目录查找性能基准测试
fn bench_host_directory(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_directory");

    for size in [10, 100, 1000].iter() {
        let hosts = create_host_list(*size);
        let target = HostTarget::new(&format!("alias_{}", size / 2), 56565);

        group.bench_with_input(BenchmarkId::new("resolve_alias", size), size, |b, _| {
            b.iter(|| black_box(hosts.resolve_target(black_box(&target))));
        });

        // 未命中时遍历整个列表
        let miss = HostTarget::new("SSL://unknown.example.org", 56565);
        group.bench_with_input(BenchmarkId::new("resolve_miss", size), size, |b, _| {
            b.iter(|| black_box(hosts.resolve_target(black_box(&miss))));
        });
    }

    group.finish();
}

/// 会话注册表性能基准测试
fn bench_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("socket_registry");

    for count in [8, 64, 256].iter() {
        let mut registry = SocketRegistry::new();
        let mut handles = Vec::new();
        for i in 0..*count {
            let socket = Socket::new(Domain::IPV4, Type::STREAM, None).unwrap();
            handles.push(socket.as_raw_fd());
            registry.add(
                socket,
                SessionType::UdaServer,
                &format!("uda{}.example.org", i),
                56565,
                SessionState::new(Duration::from_secs(600)),
            );
        }
        let last = *handles.last().unwrap();

        group.bench_with_input(BenchmarkId::new("find_handle", count), count, |b, _| {
            b.iter(|| black_box(registry.find(black_box(last))));
        });

        let host = format!("uda{}.example.org", count / 2);
        group.bench_with_input(BenchmarkId::new("find_host_port", count), count, |b, _| {
            b.iter(|| black_box(registry.find_by_host_port(black_box(&host), 56565)));
        });
    }

    group.finish();
}

/// 主机名分类性能基准测试
fn bench_host_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_classification");

    let hosts = [
        "localhost",
        "192.168.100.200",
        "fe80::1%eth0",
        "uda2.mast.example.org",
    ];

    group.bench_function("classify_host", |b| {
        b.iter(|| {
            for host in hosts.iter() {
                black_box(classify_host(black_box(host)));
            }
        });
    });

    group.bench_function("is_numeric_ipv4", |b| {
        b.iter(|| {
            for host in hosts.iter() {
                black_box(is_numeric_ipv4(black_box(host)));
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_host_directory,
    bench_registry,
    bench_host_classification
);

criterion_main!(benches);
