//! Lookup, build and failure behavior of `ModuleCache`.

use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};

use modcache_lib::consts::{CHECKSUM_EXT, COMPILE_LOG, COMPLETE_MARKER, MODULE_NAME_PREFIX};
use modcache_lib::identity::{checksum_from_modulename, identity_of, modulename_from_checksum};
use modcache_lib::{BuildInputs, CacheError, ModuleId, Signed};

use super::common::{CountingBuilder, EmptyBuilder, FailingBuilder, PathLoader, TestEnv};

fn module_name(dir: &std::path::Path) -> String {
  dir.file_name().unwrap().to_str().unwrap().to_string()
}

mod caching {
  use super::*;

  #[test]
  fn second_build_reuses_module() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let inputs = env.inputs("double f(double x);");

    let first = cache.build_module(&inputs).unwrap();
    let second = cache.build_module(&inputs).unwrap();

    assert_eq!(first, second);
    assert_eq!(builder.calls(), 1);
  }

  #[test]
  fn module_name_is_prefixed_checksum() {
    let env = TestEnv::new();
    let cache = env.cache(CountingBuilder::new());
    let inputs = env.inputs("int g();");

    let dir = cache.build_module(&inputs).unwrap();
    let name = module_name(&dir);

    assert!(name.starts_with(MODULE_NAME_PREFIX));
    assert_eq!(checksum_from_modulename(&name), Some(inputs.identity_checksum().unwrap()));
  }

  #[test]
  fn published_entry_has_complete_layout() {
    let env = TestEnv::new();
    let cache = env.cache(CountingBuilder::new());

    let dir = cache.build_module(&env.inputs("int h();")).unwrap();
    let name = module_name(&dir);

    assert_eq!(dir, env.config().cache_dir.join(&name));
    assert!(dir.join(COMPLETE_MARKER).is_file());
    assert!(dir.join(COMPILE_LOG).is_file());
    assert!(dir.join("module.c").is_file());
    assert!(dir.join(format!("{}.{}", name, CHECKSUM_EXT)).is_file());
    assert_eq!(cache.cached_modules().unwrap(), vec![name]);
  }

  #[test]
  fn fresh_cache_finds_published_module() {
    let env = TestEnv::new();
    let inputs = env.inputs("int restart();");
    let first_builder = CountingBuilder::new();
    let built = env.cache(first_builder.clone()).build_module(&inputs).unwrap();

    let second_builder = CountingBuilder::new();
    let restarted = env.cache(second_builder.clone());
    let imported = restarted.import_module(module_name(&built).as_str()).unwrap();
    let rebuilt = restarted.build_module(&inputs).unwrap();

    assert_eq!(imported, Some(built.clone()));
    assert_eq!(rebuilt, built);
    assert_eq!(first_builder.calls(), 1);
    assert_eq!(second_builder.calls(), 0);
  }

  #[test]
  fn identity_does_not_depend_on_cache_root() {
    let first = TestEnv::new();
    let second = TestEnv::new();
    let code = "void relocate();";

    // Same file contents, different source and cache directories.
    let a = first.cache(CountingBuilder::new()).build_module(&first.inputs(code)).unwrap();
    let b = second.cache(CountingBuilder::new()).build_module(&second.inputs(code)).unwrap();

    assert_ne!(a, b);
    assert_eq!(module_name(&a), module_name(&b));
  }

  #[test]
  fn changed_source_builds_new_module() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let inputs = env.inputs("int k();");

    let before = cache.build_module(&inputs).unwrap();
    env.write_source("module.c", "double add(double a, double b) { return b + a; }");
    let after = cache.build_module(&inputs).unwrap();

    assert_ne!(before, after);
    assert_eq!(builder.calls(), 2);
    assert_eq!(cache.cached_modules().unwrap().len(), 2);
  }

  #[test]
  fn code_moved_between_sources_builds_new_module() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let inputs = BuildInputs::new()
      .with_source_directory(env.src_dir())
      .with_sources(["a.c", "b.c"]);

    env.write_source("a.c", "static int k=1;");
    env.write_source("b.c", "static int k=2;");
    let split = cache.build_module(&inputs).unwrap();

    env.write_source("a.c", "static int k=1;static int k=2;");
    env.write_source("b.c", "");
    let merged = cache.build_module(&inputs).unwrap();

    assert_ne!(module_name(&split), module_name(&merged));
    assert_eq!(builder.calls(), 2);
  }

  #[test]
  fn incomplete_entry_is_rebuilt() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let inputs = env.inputs("int crashed();");

    // Leftovers of a publisher that died before writing the marker.
    let name = modulename_from_checksum(&inputs.identity_checksum().unwrap());
    let partial = env.config().cache_dir.join(&name);
    fs::create_dir_all(&partial).unwrap();
    fs::write(partial.join("half_copied.o"), b"garbage").unwrap();

    assert_eq!(cache.import_module(name.as_str()).unwrap(), None);
    let dir = cache.build_module(&inputs).unwrap();

    assert_eq!(builder.calls(), 1);
    assert!(dir.join(COMPLETE_MARKER).is_file());
    assert!(!dir.join("half_copied.o").exists());
  }
}

mod signatures {
  use super::*;

  struct Form {
    key: String,
    signature_calls: AtomicUsize,
  }

  impl Signed for Form {
    fn object_key(&self) -> String {
      self.key.clone()
    }

    fn signature(&self) -> String {
      self.signature_calls.fetch_add(1, Ordering::SeqCst);
      format!("form signature for {}", self.key)
    }
  }

  #[test]
  fn signature_names_the_module() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let inputs = env.inputs("int s();").with_signature("(signature one)");

    let dir = cache.build_module(&inputs).unwrap();

    assert_eq!(module_name(&dir), identity_of(ModuleId::Text("(signature one)")).name());
    assert_eq!(cache.import_module("(signature one)").unwrap(), Some(dir.clone()));
    assert_eq!(cache.import_module(module_name(&dir).as_str()).unwrap(), Some(dir));
  }

  #[test]
  fn signature_ignores_input_contents() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());

    let a = cache
      .build_module(&env.inputs("int a();").with_signature("shared"))
      .unwrap();
    let b = cache
      .build_module(&env.inputs("int b();").with_signature("shared"))
      .unwrap();

    assert_eq!(a, b);
    assert_eq!(builder.calls(), 1);
  }

  #[test]
  fn object_key_short_circuits_signature() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let form = Form {
      key: "form#7".to_string(),
      signature_calls: AtomicUsize::new(0),
    };

    let built = cache.build_module_for(&form, &env.inputs("int form();")).unwrap();
    let again = cache.import_module(ModuleId::Object(&form)).unwrap();

    assert_eq!(again, Some(built));
    assert_eq!(form.signature_calls.load(Ordering::SeqCst), 1);
    assert_eq!(builder.calls(), 1);
  }

  #[test]
  fn object_with_explicit_signature_is_rejected() {
    let env = TestEnv::new();
    let cache = env.cache(CountingBuilder::new());
    let form = Form {
      key: "f".to_string(),
      signature_calls: AtomicUsize::new(0),
    };

    let err = cache
      .build_module_for(&form, &env.inputs("x").with_signature("other"))
      .unwrap_err();
    assert!(matches!(err, CacheError::Input(_)));
  }
}

mod explicit_names {
  use super::*;

  #[test]
  fn builds_in_local_dir_without_caching() {
    let env = TestEnv::new();
    let cache = env.cache(CountingBuilder::new());

    let dir = cache.build_module(&env.inputs("int e();").with_modulename("my_module")).unwrap();

    assert_eq!(dir, env.local_dir().join("my_module"));
    assert!(cache.cached_modules().unwrap().is_empty());
    assert_eq!(cache.import_module("my_module").unwrap(), None);
  }

  #[test]
  fn unchanged_inputs_skip_rebuild() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let inputs = env.inputs("int e();").with_modulename("my_module");

    env.cache(builder.clone()).build_module(&inputs).unwrap();
    env.cache(builder.clone()).build_module(&inputs).unwrap();
    assert_eq!(builder.calls(), 1);

    env.write_source("module.c", "int changed;");
    env.cache(builder.clone()).build_module(&inputs).unwrap();
    assert_eq!(builder.calls(), 2);
  }

  #[test]
  fn reserved_prefix_is_rejected_before_building() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let name = format!("{}deadbeef", MODULE_NAME_PREFIX);

    let err = cache.build_module(&env.inputs("x").with_modulename(name)).unwrap_err();

    assert!(matches!(err, CacheError::Input(_)));
    assert_eq!(builder.calls(), 0);
    assert!(!env.local_dir().exists());
  }
}

mod failures {
  use super::*;

  #[test]
  fn failed_build_is_quarantined_not_published() {
    let env = TestEnv::new();
    let cache = env.cache(FailingBuilder {
      status: 2,
      message: "module.c:1: error: expected ';'",
    });

    let err = cache.build_module(&env.inputs("broken")).unwrap_err();

    let (name, status, log_path, quarantine) = match err {
      CacheError::BuildFailed {
        name,
        status,
        log_path,
        quarantine,
      } => (name, status, log_path, quarantine),
      other => panic!("expected a build failure, got {other:?}"),
    };
    let quarantine = quarantine.unwrap();
    assert_eq!(status, 2);
    assert_eq!(quarantine, env.config().error_dir.join(&name));
    assert_eq!(log_path, quarantine.join(COMPILE_LOG));
    assert!(fs::read_to_string(&log_path).unwrap().contains("expected ';'"));
    assert!(!quarantine.join(format!("{}.{}", name, CHECKSUM_EXT)).exists());
    assert!(!env.config().cache_dir.join(&name).exists());
    assert!(cache.cached_modules().unwrap().is_empty());
  }

  #[test]
  fn failure_then_fix_succeeds() {
    let env = TestEnv::new();
    let inputs = env.inputs("retry");

    let failing = env.cache(FailingBuilder {
      status: 1,
      message: "transient",
    });
    assert!(failing.build_module(&inputs).is_err());

    let builder = CountingBuilder::new();
    let dir = env.cache(builder.clone()).build_module(&inputs).unwrap();
    assert!(dir.join(COMPLETE_MARKER).is_file());
    assert_eq!(builder.calls(), 1);
  }

  #[test]
  fn load_failure_keeps_entry_but_not_in_memory() {
    let env = TestEnv::new();
    let loader = PathLoader::default();
    let cache = env.cache_with_loader(EmptyBuilder, loader.clone());

    let err = cache.build_module(&env.inputs("no artifact")).unwrap_err();

    assert!(matches!(err, CacheError::Load { .. }));
    assert_eq!(cache.cached_modules().unwrap().len(), 1);
    assert_eq!(cache.loaded_aliases(), 0);
    assert_eq!(loader.loads(), 0);
  }

  #[test]
  fn missing_input_file_fails_before_locking() {
    let env = TestEnv::new();
    let builder = CountingBuilder::new();
    let cache = env.cache(builder.clone());
    let inputs = BuildInputs::new()
      .with_source_directory(env.src_dir())
      .with_sources(["absent.c"]);

    let err = cache.build_module(&inputs).unwrap_err();

    assert!(matches!(err, CacheError::Input(_)));
    assert_eq!(builder.calls(), 0);
    assert!(fs::read_dir(&env.config().cache_dir).unwrap().next().is_none());
  }
}
