// Copyright 2023 Divy Srivastava <dj.srivastava23@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use criterion::black_box;
use criterion::criterion_group;
use criterion::criterion_main;
use criterion::Criterion;
use criterion::Throughput;
use ferrosocket::unmask;

fn unmask_benchmark(c: &mut Criterion) {
  let key = [0x12, 0x34, 0x56, 0x78];

  let mut group = c.benchmark_group("unmask");
  for size in [64usize, 1024, 64 * 1024, 1024 * 1024] {
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_with_input(format!("{size}B"), &size, |b, &size| {
      let mut buf = vec![0xABu8; size];
      b.iter(|| unmask(black_box(&mut buf), key));
    });
  }
  group.finish();
}

criterion_group!(benches, unmask_benchmark);
criterion_main!(benches);
