//! Concurrent callers of one identity build once.

use std::sync::Barrier;
use std::thread;
use std::time::Duration;

use super::common::{CountingBuilder, TestEnv};

const THREADS: usize = 8;

#[test]
fn threads_sharing_a_cache_build_once() {
  let env = TestEnv::new();
  let builder = CountingBuilder::slow(Duration::from_millis(50));
  let cache = env.cache(builder.clone());
  let inputs = env.inputs("double shared(double);");
  let barrier = Barrier::new(THREADS);

  let results: Vec<_> = thread::scope(|s| {
    let handles: Vec<_> = (0..THREADS)
      .map(|_| {
        s.spawn(|| {
          barrier.wait();
          cache.build_module(&inputs)
        })
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(builder.calls(), 1);
  let first = results[0].as_ref().unwrap();
  for result in &results {
    assert_eq!(result.as_ref().unwrap(), first);
  }
}

#[test]
fn separate_caches_on_one_root_build_once() {
  // Each cache has its own lock manager, like separate processes would.
  let env = TestEnv::new();
  let builder = CountingBuilder::slow(Duration::from_millis(50));
  let inputs = env.inputs("double across(double);");
  let caches: Vec<_> = (0..4).map(|_| env.cache(builder.clone())).collect();
  let barrier = Barrier::new(caches.len());

  let dirs: Vec<_> = thread::scope(|s| {
    let handles: Vec<_> = caches
      .iter()
      .map(|cache| {
        let barrier = &barrier;
        let inputs = &inputs;
        s.spawn(move || {
          barrier.wait();
          cache.build_module(inputs).unwrap()
        })
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(builder.calls(), 1);
  assert!(dirs.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn distinct_modules_build_independently() {
  let env = TestEnv::new();
  let builder = CountingBuilder::slow(Duration::from_millis(20));
  let cache = env.cache(builder.clone());
  let inputs: Vec<_> = (0..4).map(|i| env.inputs(&format!("int f{}();", i))).collect();

  let dirs: Vec<_> = thread::scope(|s| {
    let handles: Vec<_> = inputs
      .iter()
      .map(|inputs| {
        let cache = &cache;
        s.spawn(move || cache.build_module(inputs).unwrap())
      })
      .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
  });

  assert_eq!(builder.calls(), 4);
  assert_eq!(cache.cached_modules().unwrap().len(), 4);
  assert!(dirs.iter().all(|dir| dir.starts_with(&env.config().cache_dir)));
}

#[test]
fn repeated_builds_across_threads_stay_cached() {
  let env = TestEnv::new();
  let builder = CountingBuilder::new();
  let cache = env.cache(builder.clone());
  let inputs = env.inputs("int again();");

  cache.build_module(&inputs).unwrap();
  thread::scope(|s| {
    for _ in 0..THREADS {
      s.spawn(|| {
        for _ in 0..10 {
          cache.build_module(&inputs).unwrap();
        }
      });
    }
  });

  assert_eq!(builder.calls(), 1);
}
