//! End-to-end build scenarios against a fake runtime and plain-directory storage

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use strata::build::{BuildEvent, BuildOptions, BuildReport, Builder, LayerOutcome};
use strata::config::{BuildContext, Config};
use strata::error::{StrataError, StrataResult};
use strata::layer::{LayerBase, LayerDeclaration, Stackfile};
use strata::oci::bundle::{mtree_files, mtree_name, read_bundle_meta, write_bundle_meta};
use strata::oci::types::{
    Arch, ImageConfigurationBuilder, ImageManifestBuilder, Os, RootFs, SCHEMA_VERSION,
};
use strata::oci::{
    Descriptor, DescriptorPath, ImageConfiguration, ImageManifest, MediaType, OciLayout,
};
use strata::orchestration::{BuildRuntime, OutputSink};
use strata::storage::{DirStorage, Storage};
use tempfile::TempDir;

/// Stands in for umoci, skopeo and chroot.
///
/// `run` copies the layer's imports into the rootfs and records a marker
/// file; `repack` writes a layer blob listing the rootfs.
#[derive(Default)]
struct FakeRuntime {
    runs: Mutex<Vec<String>>,
}

impl FakeRuntime {
    fn take_runs(&self) -> Vec<String> {
        std::mem::take(&mut *self.runs.lock().unwrap())
    }
}

#[async_trait]
impl BuildRuntime for FakeRuntime {
    async fn acquire_base(
        &self,
        ctx: &BuildContext,
        name: &str,
        base: &LayerBase,
        bundle: &Path,
    ) -> StrataResult<()> {
        assert_eq!(base, &LayerBase::Scratch);
        std::fs::create_dir_all(bundle.join("rootfs")).unwrap();

        let layout = OciLayout::open(&ctx.oci_dir)?;
        let config = ImageConfigurationBuilder::default()
            .architecture(Arch::from("amd64"))
            .os(Os::Linux)
            .rootfs(RootFs::default())
            .build()?;
        let manifest = ImageManifestBuilder::default()
            .schema_version(SCHEMA_VERSION)
            .media_type(MediaType::ImageManifest)
            .config(layout.put_json(MediaType::ImageConfig, &config)?)
            .layers(Vec::<Descriptor>::new())
            .build()?;
        let descriptor = layout.put_json(MediaType::ImageManifest, &manifest)?;
        layout.update_reference(name, &descriptor)?;

        std::fs::write(bundle.join(mtree_name(&descriptor)), "").unwrap();
        write_bundle_meta(bundle, &DescriptorPath::new(descriptor))
    }

    async fn run(
        &self,
        ctx: &BuildContext,
        decl: &LayerDeclaration,
        bundle: &Path,
        _on_failure: Option<&str>,
        on_output: &OutputSink<'_>,
    ) -> StrataResult<()> {
        self.runs.lock().unwrap().push(decl.name.clone());
        let rootfs = bundle.join("rootfs");

        let imports = ctx.imports_dir(&decl.name);
        for entry in std::fs::read_dir(&imports).unwrap() {
            let entry = entry.unwrap();
            if entry.file_type().unwrap().is_file() {
                std::fs::copy(entry.path(), rootfs.join(entry.file_name())).unwrap();
            }
        }
        for command in &decl.run {
            on_output(format!("+ {}", command));
        }
        std::fs::write(rootfs.join(format!("{}.built", decl.name)), decl.run.join("\n")).unwrap();
        Ok(())
    }

    async fn repack(&self, ctx: &BuildContext, name: &str, bundle: &Path) -> StrataResult<()> {
        let layout = OciLayout::open(&ctx.oci_dir)?;
        let meta = read_bundle_meta(bundle)?;
        let parent = meta.from_descriptor_path.descriptor().unwrap().clone();

        let mut manifest: ImageManifest = layout.read_json(parent.digest())?;
        let mut config: ImageConfiguration = layout.read_json(manifest.config().digest())?;

        let layer = layout.put_blob(
            MediaType::ImageLayerGzip,
            listing(&bundle.join("rootfs")).as_bytes(),
        )?;
        let mut rootfs = config.rootfs().clone();
        let mut diff_ids = rootfs.diff_ids().clone();
        diff_ids.push(layer.digest().clone());
        rootfs.set_diff_ids(diff_ids);
        config.set_rootfs(rootfs);

        let mut layers = manifest.layers().clone();
        layers.push(layer);
        manifest.set_layers(layers);
        manifest.set_config(layout.put_json(MediaType::ImageConfig, &config)?);

        let descriptor = layout.put_json(MediaType::ImageManifest, &manifest)?;
        layout.update_reference(name, &descriptor)
    }

    fn runtime_name(&self) -> &'static str {
        "fake"
    }
}

/// Sorted `name=content` lines of the files in `dir`
fn listing(dir: &Path) -> String {
    let mut lines: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| {
            let path = e.unwrap().path();
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            format!("{}={}", path.file_name().unwrap().to_string_lossy(), content)
        })
        .collect();
    lines.sort();
    lines.join("\n")
}

/// Plain-directory storage that counts detaches
struct CountingStorage {
    inner: DirStorage,
    detached: AtomicUsize,
}

#[async_trait]
impl Storage for CountingStorage {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn create(&self, name: &str) -> StrataResult<()> {
        self.inner.create(name).await
    }

    async fn snapshot(&self, source: &str, target: &str) -> StrataResult<()> {
        self.inner.snapshot(source, target).await
    }

    async fn restore(&self, source: &str, target: &str) -> StrataResult<()> {
        self.inner.restore(source, target).await
    }

    async fn delete(&self, name: &str) -> StrataResult<()> {
        self.inner.delete(name).await
    }

    async fn detach(&self) -> StrataResult<()> {
        self.detached.fetch_add(1, Ordering::SeqCst);
        self.inner.detach().await
    }

    fn path(&self, name: &str) -> PathBuf {
        self.inner.path(name)
    }
}

struct Fixture {
    temp: TempDir,
    ctx: BuildContext,
    storage: DirStorage,
    runtime: FakeRuntime,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.build.rsync = false;
        let ctx = BuildContext::from_config(&config, temp.path());
        let storage = DirStorage::new(ctx.roots_dir.clone());
        Self {
            temp,
            ctx,
            storage,
            runtime: FakeRuntime::default(),
        }
    }

    fn data_file(&self) -> PathBuf {
        self.temp.path().join("data.txt")
    }

    /// A (scratch) -> B (build-only, imports data.txt) -> C
    fn stack(&self) -> Stackfile {
        let yaml = format!(
            r#"
A:
  from:
    type: scratch
  run: echo a
B:
  from:
    type: built
    tag: A
  build_only: true
  import: {data}
  run: cp /strata/data.txt /data.txt
C:
  from:
    type: built
    tag: B
  environment:
    FOO: bar
  cmd: /bin/app --serve
"#,
            data = self.data_file().display()
        );
        Stackfile::parse(&yaml, &self.temp.path().join("strata.yaml"), &[]).unwrap()
    }

    async fn build(&self, options: &BuildOptions) -> BuildReport {
        let builder = Builder::new(&self.ctx, &self.storage, &self.runtime);
        builder
            .build(&self.stack(), options, &|_: &BuildEvent<'_>| {})
            .await
            .unwrap()
    }

    fn parse(&self, yaml: &str) -> Stackfile {
        Stackfile::parse(yaml, &self.temp.path().join("strata.yaml"), &[]).unwrap()
    }

    fn layout(&self) -> OciLayout {
        OciLayout::open(&self.ctx.oci_dir).unwrap()
    }

    fn reference_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .layout()
            .list_references()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        names
    }
}

fn outcomes(report: &BuildReport) -> Vec<(&str, LayerOutcome)> {
    report
        .layers
        .iter()
        .map(|l| (l.name.as_str(), l.outcome))
        .collect()
}

#[tokio::test]
async fn first_build_references_committed_layers_only() {
    let fx = Fixture::new();
    std::fs::write(fx.data_file(), "v1").unwrap();

    let report = fx.build(&BuildOptions::default()).await;
    assert_eq!(
        outcomes(&report),
        vec![
            ("A", LayerOutcome::Built),
            ("B", LayerOutcome::BuiltOnly),
            ("C", LayerOutcome::Built),
        ]
    );
    assert_eq!(fx.reference_names(), vec!["A", "C"]);
    assert!(report.get("B").unwrap().descriptor.is_none());

    // Snapshots exist for every layer, the working tree is gone
    for name in ["A", "B", "C"] {
        assert!(fx.storage.exists(name), "missing snapshot {}", name);
    }
    assert!(!fx.storage.exists(".working"));

    // C saw B's import and carries the merged config
    let c_root = fx.ctx.rootfs_dir("C");
    assert_eq!(std::fs::read_to_string(c_root.join("data.txt")).unwrap(), "v1");
    let c = report.get("C").unwrap().descriptor.clone().unwrap();
    let manifest: ImageManifest = fx.layout().read_json(c.digest()).unwrap();
    let config: ImageConfiguration = fx.layout().read_json(manifest.config().digest()).unwrap();
    let exec = config.config().clone().unwrap();
    let env = exec.env().clone().unwrap();
    // PATH comes from A's commit and is not appended twice
    assert!(env.contains(&"FOO=bar".to_string()));
    assert_eq!(env.iter().filter(|e| e.starts_with("PATH=")).count(), 1);
    assert_eq!(
        exec.cmd(),
        &Some(vec!["/bin/app".to_string(), "--serve".to_string()])
    );
    assert_eq!(
        config.history().last().unwrap().created_by().as_deref(),
        Some("strata build")
    );

    // Bundle metadata follows the commit
    let meta = read_bundle_meta(&fx.ctx.bundle_dir("C")).unwrap();
    assert_eq!(meta.from_descriptor_path.root(), Some(&c));
    let mtrees = mtree_files(&fx.ctx.bundle_dir("C")).unwrap();
    assert_eq!(mtrees.len(), 1);
    assert!(mtrees[0].ends_with(mtree_name(&c)));
}

#[tokio::test]
async fn rebuild_is_fully_cached() {
    let fx = Fixture::new();
    std::fs::write(fx.data_file(), "v1").unwrap();

    let first = fx.build(&BuildOptions::default()).await;
    assert_eq!(fx.runtime.take_runs(), vec!["A", "B", "C"]);

    let second = fx.build(&BuildOptions::default()).await;
    assert!(fx.runtime.take_runs().is_empty());
    assert_eq!(second.count(LayerOutcome::Cached), 3);
    for name in ["A", "B", "C"] {
        assert_eq!(
            first.get(name).unwrap().descriptor,
            second.get(name).unwrap().descriptor
        );
        assert_eq!(
            first.get(name).unwrap().fingerprint,
            second.get(name).unwrap().fingerprint
        );
    }
    assert_eq!(fx.reference_names(), vec!["A", "C"]);
}

#[tokio::test]
async fn changed_import_rebuilds_dependents_only() {
    let fx = Fixture::new();
    std::fs::write(fx.data_file(), "v1").unwrap();
    let first = fx.build(&BuildOptions::default()).await;
    fx.runtime.take_runs();

    std::fs::write(fx.data_file(), "version two").unwrap();
    let second = fx.build(&BuildOptions::default()).await;

    assert_eq!(fx.runtime.take_runs(), vec!["B", "C"]);
    assert_eq!(
        outcomes(&second),
        vec![
            ("A", LayerOutcome::Cached),
            ("B", LayerOutcome::BuiltOnly),
            ("C", LayerOutcome::Built),
        ]
    );
    assert_eq!(
        first.get("A").unwrap().descriptor,
        second.get("A").unwrap().descriptor
    );
    assert_ne!(
        first.get("C").unwrap().descriptor,
        second.get("C").unwrap().descriptor
    );
    assert_eq!(
        std::fs::read_to_string(fx.ctx.rootfs_dir("C").join("data.txt")).unwrap(),
        "version two"
    );
}

#[tokio::test]
async fn cache_hit_without_snapshot_is_rebuilt() {
    let fx = Fixture::new();
    std::fs::write(fx.data_file(), "v1").unwrap();
    fx.build(&BuildOptions::default()).await;
    fx.runtime.take_runs();

    fx.storage.delete("A").await.unwrap();
    let report = fx.build(&BuildOptions::default()).await;

    assert_eq!(report.get("A").unwrap().outcome, LayerOutcome::Built);
    assert_eq!(report.get("B").unwrap().outcome, LayerOutcome::Cached);
    assert_eq!(fx.runtime.take_runs(), vec!["A"]);
}

#[tokio::test]
async fn no_cache_rebuilds_everything() {
    let fx = Fixture::new();
    std::fs::write(fx.data_file(), "v1").unwrap();
    fx.build(&BuildOptions::default()).await;
    fx.runtime.take_runs();

    let options = BuildOptions {
        no_cache: true,
        ..Default::default()
    };
    let report = fx.build(&options).await;
    assert_eq!(report.count(LayerOutcome::Cached), 0);
    assert_eq!(fx.runtime.take_runs(), vec!["A", "B", "C"]);
}

#[tokio::test]
async fn events_follow_layer_lifecycle() {
    let fx = Fixture::new();
    std::fs::write(fx.data_file(), "v1").unwrap();
    fx.build(&BuildOptions::default()).await;

    let seen = Mutex::new(Vec::new());
    let observer = |event: &BuildEvent<'_>| {
        let tag = match event {
            BuildEvent::LayerStarted { layer, .. } => format!("start {}", layer),
            BuildEvent::CacheChecked { layer, hit, .. } => format!("hit {} {}", layer, hit),
            BuildEvent::ReferenceUpdated { layer, .. } => format!("ref {}", layer),
            BuildEvent::LayerDone { layer, .. } => format!("done {}", layer),
            _ => return,
        };
        seen.lock().unwrap().push(tag);
    };

    let builder = Builder::new(&fx.ctx, &fx.storage, &fx.runtime);
    builder
        .build(&fx.stack(), &BuildOptions::default(), &observer)
        .await
        .unwrap();

    let seen = seen.into_inner().unwrap();
    assert_eq!(
        seen,
        vec![
            "start A", "hit A true", "ref A", "done A",
            "start B", "hit B true", "done B",
            "start C", "hit C true", "ref C", "done C",
        ]
    );
}

#[tokio::test]
async fn failing_layer_is_named_and_working_tree_removed() {
    let fx = Fixture::new();
    // data.txt never written: B's import fails
    let builder = Builder::new(&fx.ctx, &fx.storage, &fx.runtime);
    let err = builder
        .build(&fx.stack(), &BuildOptions::default(), &|_: &BuildEvent<'_>| {})
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("layer B"), "{}", message);
    assert!(message.contains("data.txt"), "{}", message);
    assert!(!fx.storage.exists(".working"));
    assert_eq!(fx.reference_names(), vec!["A"]);
}

#[tokio::test]
async fn build_only_scratch_layer_leaves_no_reference() {
    let fx = Fixture::new();
    let stack = fx.parse("T:\n  from:\n    type: scratch\n  build_only: true\n  run: echo t\n");

    let builder = Builder::new(&fx.ctx, &fx.storage, &fx.runtime);
    let report = builder
        .build(&stack, &BuildOptions::default(), &|_: &BuildEvent<'_>| {})
        .await
        .unwrap();

    assert_eq!(outcomes(&report), vec![("T", LayerOutcome::BuiltOnly)]);
    assert!(fx.reference_names().is_empty());
    assert!(fx.storage.exists("T"));
}

#[tokio::test]
async fn cyclic_stack_still_detaches_storage() {
    let fx = Fixture::new();
    let stack = fx.parse(
        "a:\n  from:\n    type: built\n    tag: b\nb:\n  from:\n    type: built\n    tag: a\n",
    );
    let storage = CountingStorage {
        inner: DirStorage::new(fx.ctx.roots_dir.clone()),
        detached: AtomicUsize::new(0),
    };
    std::fs::create_dir_all(storage.path(".working")).unwrap();

    let builder = Builder::new(&fx.ctx, &storage, &fx.runtime);
    let err = builder
        .build(&stack, &BuildOptions::default(), &|_: &BuildEvent<'_>| {})
        .await
        .unwrap_err();

    assert!(matches!(err, StrataError::DependencyCycle(_)), "{}", err);
    assert_eq!(storage.detached.load(Ordering::SeqCst), 1);
    assert!(!storage.exists(".working"));
    assert!(!OciLayout::exists(&fx.ctx.oci_dir));
}
