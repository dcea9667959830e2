use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, warn};
use zip::ZipArchive;

use crate::classfile::{ACC_NATIVE, ACC_VARARGS, ClassFile, parse_class_skeleton};
use crate::descriptor::binary_name;
use crate::ir::MethodSig;

const SIGNATURE_POLYMORPHIC_OWNERS: [&str; 2] =
    ["java/lang/invoke/MethodHandle", "java/lang/invoke/VarHandle"];

/// Structural summary of one class: hierarchy and declared members.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ClassSignature {
    pub(crate) name: String,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) methods: BTreeSet<MethodSig>,
    pub(crate) fields: BTreeSet<String>,
    /// Names of `native varargs` methods on the method/var handle classes.
    pub(crate) signature_polymorphic: BTreeSet<String>,
    pub(crate) is_runtime: bool,
}

impl ClassSignature {
    pub(crate) fn from_class(class: &ClassFile, is_runtime: bool) -> Self {
        let polymorphic_owner = SIGNATURE_POLYMORPHIC_OWNERS.contains(&class.name.as_str());
        let signature_polymorphic = class
            .methods
            .iter()
            .filter(|method| {
                polymorphic_owner
                    && method.access & (ACC_NATIVE | ACC_VARARGS) == ACC_NATIVE | ACC_VARARGS
                    && method.descriptor.starts_with("([Ljava/lang/Object;)")
            })
            .map(|method| method.name.clone())
            .collect();
        Self {
            name: class.name.clone(),
            super_name: class.super_name.clone(),
            interfaces: class.interfaces.clone(),
            methods: class
                .methods
                .iter()
                .map(|method| MethodSig::from_descriptor(&method.name, &method.descriptor))
                .collect(),
            fields: class.fields.iter().map(|field| field.name.clone()).collect(),
            signature_polymorphic,
            is_runtime,
        }
    }

    pub(crate) fn declares_method(&self, method: &MethodSig) -> bool {
        self.methods.contains(method)
    }

    pub(crate) fn declares_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    /// The canonical form of a signature-polymorphic call site, if `method` is one.
    pub(crate) fn polymorphic_form(&self, method: &MethodSig) -> Option<MethodSig> {
        self.signature_polymorphic
            .contains(&method.name)
            .then(|| MethodSig::new(method.name.clone(), "([Ljava/lang/Object;)"))
    }

    pub(crate) fn ancestors(&self) -> impl Iterator<Item = &str> {
        self.super_name
            .as_deref()
            .into_iter()
            .chain(self.interfaces.iter().map(String::as_str))
    }
}

/// Supplies class bytes by internal name.
pub(crate) trait ClassSource {
    fn find(&self, internal_name: &str) -> Result<Option<Vec<u8>>>;

    /// Whether classes from this source belong to the platform runtime.
    fn is_runtime(&self) -> bool;

    fn describe(&self) -> String;
}

/// Class directory laid out by package.
pub(crate) struct DirectorySource {
    root: PathBuf,
    runtime: bool,
}

impl DirectorySource {
    pub(crate) fn new(root: PathBuf, runtime: bool) -> Self {
        Self { root, runtime }
    }
}

impl ClassSource for DirectorySource {
    fn find(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.root.join(format!("{internal_name}.class"));
        if !path.is_file() {
            return Ok(None);
        }
        let data = fs::read(&path).with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Some(data))
    }

    fn is_runtime(&self) -> bool {
        self.runtime
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}

/// Zip based class container: a JAR, or a JMOD whose classes live under `classes/`.
pub(crate) struct ArchiveSource {
    path: PathBuf,
    prefix: &'static str,
    runtime: bool,
    archive: Option<RefCell<ZipArchive<fs::File>>>,
}

impl ArchiveSource {
    /// Open a jar; with `keep_open` unset the archive is reopened on every lookup.
    pub(crate) fn jar(path: PathBuf, runtime: bool, keep_open: bool) -> Result<Self> {
        Self::open(path, "", runtime, keep_open)
    }

    pub(crate) fn jmod(path: PathBuf, keep_open: bool) -> Result<Self> {
        Self::open(path, "classes/", true, keep_open)
    }

    fn open(path: PathBuf, prefix: &'static str, runtime: bool, keep_open: bool) -> Result<Self> {
        let archive = open_archive(&path)?;
        Ok(Self {
            path,
            prefix,
            runtime,
            archive: keep_open.then(|| RefCell::new(archive)),
        })
    }

    fn read_entry(&self, archive: &mut ZipArchive<fs::File>, name: &str) -> Result<Option<Vec<u8>>> {
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read {}:{}", self.path.display(), name));
            }
        };
        let mut data = Vec::new();
        entry
            .read_to_end(&mut data)
            .with_context(|| format!("failed to read {}:{}", self.path.display(), name))?;
        Ok(Some(data))
    }
}

impl ClassSource for ArchiveSource {
    fn find(&self, internal_name: &str) -> Result<Option<Vec<u8>>> {
        let name = format!("{}{internal_name}.class", self.prefix);
        match &self.archive {
            Some(archive) => self.read_entry(&mut archive.borrow_mut(), &name),
            None => {
                let mut archive = open_archive(&self.path)?;
                self.read_entry(&mut archive, &name)
            }
        }
    }

    fn is_runtime(&self) -> bool {
        self.runtime
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

fn open_archive(path: &Path) -> Result<ZipArchive<fs::File>> {
    let file = fs::File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    ZipArchive::new(file).with_context(|| format!("failed to read {}", path.display()))
}

/// Open a classpath entry (directory or jar) as a class source.
pub(crate) fn open_source(path: &Path, runtime: bool, keep_open: bool) -> Result<Box<dyn ClassSource>> {
    if path.is_dir() {
        return Ok(Box::new(DirectorySource::new(path.to_path_buf(), runtime)));
    }
    if !path.exists() {
        anyhow::bail!("classpath entry not found: {}", path.display());
    }
    Ok(Box::new(ArchiveSource::jar(path.to_path_buf(), runtime, keep_open)?))
}

/// Locate the platform runtime classes of a JDK installation.
///
/// JDK 9+ ships `jmods/*.jmod`; older releases ship `rt.jar` and friends under `jre/lib` or `lib`.
pub(crate) fn runtime_sources(jdk_home: &Path, keep_open: bool) -> Result<Vec<Box<dyn ClassSource>>> {
    let jmods = jdk_home.join("jmods");
    if jmods.is_dir() {
        let mut sources: Vec<Box<dyn ClassSource>> = Vec::new();
        for path in sorted_files(&jmods, "jmod")? {
            sources.push(Box::new(ArchiveSource::jmod(path, keep_open)?));
        }
        if !sources.is_empty() {
            return Ok(sources);
        }
    }
    for lib in [jdk_home.join("jre").join("lib"), jdk_home.join("lib")] {
        if !lib.join("rt.jar").is_file() {
            continue;
        }
        let mut sources: Vec<Box<dyn ClassSource>> = Vec::new();
        for path in sorted_files(&lib, "jar")? {
            sources.push(Box::new(ArchiveSource::jar(path, true, keep_open)?));
        }
        return Ok(sources);
    }
    anyhow::bail!(
        "no runtime classes (jmods/ or rt.jar) found under {}",
        jdk_home.display()
    )
}

fn sorted_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in
        fs::read_dir(dir).with_context(|| format!("failed to read directory {}", dir.display()))?
    {
        let entry = entry.with_context(|| format!("failed to read entry under {}", dir.display()))?;
        let path = entry.path();
        let matches = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// A class referenced while scanning could not be loaded in strict mode.
#[derive(Debug, Error)]
#[error("the referenced class '{class}' (needed by '{origin}') cannot be loaded")]
pub(crate) struct RelatedClassError {
    pub(crate) class: String,
    pub(crate) origin: String,
}

/// Lazy, caching lookup of class signatures across the checked units and class sources.
pub(crate) struct ClassResolver {
    sources: Vec<Box<dyn ClassSource>>,
    checked: HashMap<String, Rc<ClassSignature>>,
    cache: RefCell<HashMap<String, Option<Rc<ClassSignature>>>>,
    missing: RefCell<BTreeSet<String>>,
    fail_on_missing: bool,
}

impl ClassResolver {
    pub(crate) fn new(sources: Vec<Box<dyn ClassSource>>, fail_on_missing: bool) -> Self {
        Self {
            sources,
            checked: HashMap::new(),
            cache: RefCell::new(HashMap::new()),
            missing: RefCell::new(BTreeSet::new()),
            fail_on_missing,
        }
    }

    /// Register a class that is being checked; it shadows any classpath copy.
    pub(crate) fn add_checked(&mut self, signature: ClassSignature) {
        self.checked
            .insert(signature.name.clone(), Rc::new(signature));
    }

    pub(crate) fn resolve(&self, internal_name: &str) -> Option<Rc<ClassSignature>> {
        if internal_name.starts_with('[') {
            return None;
        }
        if let Some(signature) = self.checked.get(internal_name) {
            return Some(Rc::clone(signature));
        }
        if let Some(cached) = self.cache.borrow().get(internal_name) {
            return cached.clone();
        }
        let loaded = self.load(internal_name).map(Rc::new);
        self.cache
            .borrow_mut()
            .insert(internal_name.to_string(), loaded.clone());
        loaded
    }

    fn load(&self, internal_name: &str) -> Option<ClassSignature> {
        for source in &self.sources {
            let bytes = match source.find(internal_name) {
                Ok(Some(bytes)) => bytes,
                Ok(None) => continue,
                Err(err) => {
                    debug!("lookup of {} in {} failed: {err:#}", internal_name, source.describe());
                    continue;
                }
            };
            return match parse_class_skeleton(&bytes) {
                Ok(class) => Some(ClassSignature::from_class(&class, source.is_runtime())),
                Err(err) => {
                    debug!(
                        "failed to parse {} from {}: {err}",
                        internal_name,
                        source.describe()
                    );
                    None
                }
            };
        }
        debug!("class {} not found on classpath", internal_name);
        None
    }

    /// Resolve a class needed to follow the hierarchy of `origin`.
    ///
    /// Missing classes fail in strict mode; otherwise they warn once and count as unknown.
    pub(crate) fn lookup_related(
        &self,
        internal_name: &str,
        origin: &str,
    ) -> Result<Option<Rc<ClassSignature>>, RelatedClassError> {
        if let Some(signature) = self.resolve(internal_name) {
            return Ok(Some(signature));
        }
        if internal_name.starts_with('[') {
            return Ok(None);
        }
        if self.fail_on_missing {
            return Err(RelatedClassError {
                class: binary_name(internal_name),
                origin: binary_name(origin),
            });
        }
        if self.missing.borrow_mut().insert(internal_name.to_string()) {
            warn!(
                "The referenced class '{}' cannot be loaded. Please fix the classpath!",
                binary_name(internal_name)
            );
        }
        Ok(None)
    }

    /// Number of distinct classes loaded from class sources.
    pub(crate) fn related_count(&self) -> usize {
        self.cache
            .borrow()
            .values()
            .filter(|entry| entry.is_some())
            .count()
    }

    pub(crate) fn missing_classes(&self) -> Vec<String> {
        self.missing.borrow().iter().map(|name| binary_name(name)).collect()
    }
}
