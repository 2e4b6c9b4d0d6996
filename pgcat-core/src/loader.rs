//! Locating output plugin initializers by module path and symbol name.
//!
//! Initializers linked into the binary are plain Rust functions. Shared
//! libraries must be pgcat plugins built with [`export_output_plugin!`]: the
//! loader reads their [`PluginDescriptor`] and refuses any library whose
//! descriptor is missing or was produced by a different build of this crate,
//! before the initializer ever runs.
//!
//! [`export_output_plugin!`]: crate::export_output_plugin

use std::cell::RefCell;
use std::collections::HashMap;
use std::env::consts::DLL_EXTENSION;
use std::mem::{align_of, size_of};
use std::path::{Path, PathBuf};

use libloading::Library;

use crate::callbacks::{Change, DecodingContext, OutputPluginCallbacks, Transaction};
use crate::error::{Error, Result};

/// Fills a callback table with a plugin's callbacks.
pub type PluginInitFn = fn(&mut OutputPluginCallbacks);

/// Initializer as exported from a shared library.
pub type SharedPluginInitFn = unsafe extern "C" fn(*mut OutputPluginCallbacks);

pub type PluginDescriptorFn = extern "C" fn() -> PluginDescriptor;

/// Prefix expanded to the configured library directory.
pub const LIBDIR_MACRO: &str = "$libdir";

pub const PLUGIN_DESCRIPTOR_SYMBOL: &str = "pgcat_output_plugin_descriptor";
pub const PLUGIN_MAGIC: u32 = 0x7067_6361;
pub const PLUGIN_ABI_VERSION: u32 = 1;

/// Identifies a shared library as a pgcat output plugin.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PluginDescriptor {
    pub magic: u32,
    pub abi_version: u32,
    /// Fingerprint of the crate version and the layout of every type a
    /// plugin callback receives.
    pub build_id: u64,
    /// The only initializer the loader will call in this library.
    pub init: SharedPluginInitFn,
}

impl PluginDescriptor {
    pub const fn new(init: SharedPluginInitFn) -> Self {
        Self {
            magic: PLUGIN_MAGIC,
            abi_version: PLUGIN_ABI_VERSION,
            build_id: build_id(),
            init,
        }
    }

    fn mismatch(&self) -> Option<String> {
        if self.magic != PLUGIN_MAGIC {
            Some(format!("unexpected magic {:#010x}", self.magic))
        } else if self.abi_version != PLUGIN_ABI_VERSION {
            Some(format!(
                "built for plugin ABI {}, expected {}",
                self.abi_version, PLUGIN_ABI_VERSION
            ))
        } else if self.build_id != build_id() {
            Some(format!(
                "built against another pgcat-core (build {:016x}, expected {:016x})",
                self.build_id,
                build_id()
            ))
        } else {
            None
        }
    }
}

const fn build_id() -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let version = env!("CARGO_PKG_VERSION").as_bytes();
    let layout = [
        size_of::<OutputPluginCallbacks>(),
        size_of::<DecodingContext>(),
        align_of::<DecodingContext>(),
        size_of::<Transaction>(),
        size_of::<Change>(),
    ];

    let mut hash = FNV_OFFSET;
    let mut i = 0;
    while i < version.len() {
        hash = (hash ^ version[i] as u64).wrapping_mul(FNV_PRIME);
        i += 1;
    }
    let mut i = 0;
    while i < layout.len() {
        hash = (hash ^ layout[i] as u64).wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Exports `$init` from a `cdylib` as a pgcat output plugin, under the
/// `_PG_output_plugin_init` symbol next to the plugin descriptor.
#[macro_export]
macro_rules! export_output_plugin {
    ($init:path) => {
        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn pgcat_output_plugin_descriptor() -> $crate::loader::PluginDescriptor {
            $crate::loader::PluginDescriptor::new(_PG_output_plugin_init)
        }

        /// # Safety
        ///
        /// `callbacks` must be null or point to a valid callback table.
        #[no_mangle]
        #[allow(non_snake_case, improper_ctypes_definitions)]
        pub unsafe extern "C" fn _PG_output_plugin_init(
            callbacks: *mut $crate::callbacks::OutputPluginCallbacks,
        ) {
            if let Some(callbacks) = unsafe { callbacks.as_mut() } {
                $init(callbacks);
            }
        }
    };
}

/// A resolved initializer, ready to fill a callback table.
#[derive(Debug, Clone, Copy)]
pub struct PluginInit(InitFn);

#[derive(Debug, Clone, Copy)]
enum InitFn {
    Linked(PluginInitFn),
    Shared(SharedPluginInitFn),
}

impl PluginInit {
    pub fn linked(init: PluginInitFn) -> Self {
        Self(InitFn::Linked(init))
    }

    /// # Safety
    ///
    /// `init` must come from a library built with [`export_output_plugin!`]
    /// against this build of the crate, and that library must stay loaded for
    /// the rest of the process.
    ///
    /// [`export_output_plugin!`]: crate::export_output_plugin
    pub unsafe fn shared(init: SharedPluginInitFn) -> Self {
        Self(InitFn::Shared(init))
    }

    pub fn run(self, callbacks: &mut OutputPluginCallbacks) {
        match self.0 {
            InitFn::Linked(init) => init(callbacks),
            // SAFETY: guaranteed by the caller of `PluginInit::shared`.
            InitFn::Shared(init) => unsafe { init(callbacks) },
        }
    }
}

impl From<PluginInitFn> for PluginInit {
    fn from(init: PluginInitFn) -> Self {
        Self::linked(init)
    }
}

pub trait PluginLoader {
    fn load_init(&self, module: &str, symbol: &str) -> Result<PluginInit>;
}

/// Initializers linked into the current binary, looked up by module and symbol.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    modules: HashMap<String, HashMap<String, PluginInitFn>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: &str, symbol: &str, init: PluginInitFn) -> &mut Self {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(symbol.to_string(), init);
        self
    }

    pub fn with(mut self, module: &str, symbol: &str, init: PluginInitFn) -> Self {
        self.register(module, symbol, init);
        self
    }
}

impl PluginLoader for SymbolTable {
    fn load_init(&self, module: &str, symbol: &str) -> Result<PluginInit> {
        let symbols = self.modules.get(module).ok_or_else(|| Error::ModuleLoad {
            path: PathBuf::from(module),
            reason: "no such module is registered".to_string(),
        })?;
        symbols
            .get(symbol)
            .copied()
            .map(PluginInit::linked)
            .ok_or_else(|| Error::MissingInitSymbol {
                module: module.to_string(),
                symbol: symbol.to_string(),
            })
    }
}

/// Loads initializers from pgcat plugin libraries on disk.
///
/// Accepted libraries stay loaded for the rest of the process, so a returned
/// [`PluginInit`] never dangles.
pub struct SharedLibraryLoader {
    libdir: PathBuf,
    libraries: RefCell<HashMap<PathBuf, (&'static Library, PluginDescriptor)>>,
}

impl SharedLibraryLoader {
    pub fn new(libdir: impl Into<PathBuf>) -> Self {
        Self {
            libdir: libdir.into(),
            libraries: RefCell::new(HashMap::new()),
        }
    }

    pub fn libdir(&self) -> &Path {
        &self.libdir
    }

    /// Expands a leading `$libdir` and appends the platform library
    /// extension when `module` has none.
    pub fn expand_path(&self, module: &str) -> PathBuf {
        let path = match module.strip_prefix(LIBDIR_MACRO) {
            Some(rest) => self.libdir.join(rest.trim_start_matches(['/', '\\'])),
            None => PathBuf::from(module),
        };
        if path.extension().is_none() {
            path.with_extension(DLL_EXTENSION)
        } else {
            path
        }
    }

    fn open(&self, path: &Path) -> Result<(&'static Library, PluginDescriptor)> {
        if let Some(loaded) = self.libraries.borrow().get(path).copied() {
            return Ok(loaded);
        }

        // SAFETY: loading runs the library's constructors; the path comes
        // from trusted configuration.
        let library = unsafe { Library::new(path) }.map_err(|e| Error::ModuleLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let incompatible = |reason: String| Error::IncompatiblePlugin {
            path: path.to_path_buf(),
            reason,
        };
        // SAFETY: the descriptor name is reserved for `export_output_plugin!`,
        // which exports it with the `PluginDescriptorFn` signature.
        let describe =
            unsafe { library.get::<PluginDescriptorFn>(PLUGIN_DESCRIPTOR_SYMBOL.as_bytes()) }
                .map_err(|_| incompatible(format!("no {PLUGIN_DESCRIPTOR_SYMBOL} symbol")))?;
        let descriptor = describe();
        if let Some(reason) = descriptor.mismatch() {
            return Err(incompatible(reason));
        }

        drop(describe);
        tracing::debug!("loaded output plugin library {}", path.display());
        let library: &'static Library = Box::leak(Box::new(library));
        self.libraries
            .borrow_mut()
            .insert(path.to_path_buf(), (library, descriptor));
        Ok((library, descriptor))
    }
}

impl PluginLoader for SharedLibraryLoader {
    fn load_init(&self, module: &str, symbol: &str) -> Result<PluginInit> {
        let path = self.expand_path(module);
        let (library, descriptor) = self.open(&path)?;

        // Only the address is used; nothing is called through this type
        // unless it is the descriptor's own initializer.
        // SAFETY: reading a symbol's address has no side effects.
        let exported = unsafe { library.get::<*const ()>(symbol.as_bytes()) }
            .map(|address| *address)
            .map_err(|_| Error::MissingInitSymbol {
                module: module.to_string(),
                symbol: symbol.to_string(),
            })?;
        if exported as usize != descriptor.init as usize {
            return Err(Error::IncompatiblePlugin {
                path,
                reason: format!("{symbol} is not the initializer exported by the plugin"),
            });
        }
        // SAFETY: the descriptor matches this build and names this
        // initializer; the library is never unloaded.
        Ok(unsafe { PluginInit::shared(descriptor.init) })
    }
}

#[cfg(test)]
#[allow(improper_ctypes_definitions)]
mod tests {
    use super::*;
    use crate::callbacks::DecodingContext;

    fn shutdown(ctx: &mut DecodingContext) {
        ctx.write("bye");
    }

    fn init(cb: &mut OutputPluginCallbacks) {
        cb.shutdown = Some(shutdown);
    }

    #[test]
    fn symbol_table_resolves_registered_initializers() {
        let table = SymbolTable::new().with("$libdir/pgoutput", "_PG_output_plugin_init", init);
        let found = table
            .load_init("$libdir/pgoutput", "_PG_output_plugin_init")
            .unwrap();

        let mut cb = OutputPluginCallbacks::default();
        found.run(&mut cb);
        assert_eq!(cb.populated_slots(), vec!["shutdown"]);
    }

    #[test]
    fn symbol_table_reports_missing_module_and_symbol() {
        let table = SymbolTable::new().with("$libdir/pgoutput", "_PG_output_plugin_init", init);

        let err = table
            .load_init("$libdir/wal2json", "_PG_output_plugin_init")
            .unwrap_err();
        assert!(matches!(err, Error::ModuleLoad { .. }));

        let err = table.load_init("$libdir/pgoutput", "plugin_init").unwrap_err();
        assert_eq!(
            err.to_string(),
            "output plugins have to declare the plugin_init symbol"
        );
    }

    #[test]
    fn expands_libdir_and_extension() {
        let loader = SharedLibraryLoader::new("/usr/lib/postgresql/16/lib");
        assert_eq!(
            loader.expand_path("$libdir/pgoutput"),
            PathBuf::from(format!("/usr/lib/postgresql/16/lib/pgoutput.{DLL_EXTENSION}"))
        );
        assert_eq!(
            loader.expand_path("/opt/plugins/decoder.so"),
            PathBuf::from("/opt/plugins/decoder.so")
        );
    }

    #[test]
    fn missing_library_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let loader = SharedLibraryLoader::new(dir.path());
        let err = loader
            .load_init("$libdir/pgoutput", "_PG_output_plugin_init")
            .unwrap_err();
        match err {
            Error::ModuleLoad { path, .. } => {
                assert_eq!(path, dir.path().join(format!("pgoutput.{DLL_EXTENSION}")))
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    unsafe extern "C" fn exported_init(_callbacks: *mut OutputPluginCallbacks) {}

    #[test]
    fn current_descriptor_is_accepted() {
        let descriptor = PluginDescriptor::new(exported_init);
        assert!(descriptor.mismatch().is_none());
        assert_eq!(descriptor.magic, PLUGIN_MAGIC);
        assert_eq!(descriptor.abi_version, PLUGIN_ABI_VERSION);
    }

    #[test]
    fn foreign_descriptors_are_rejected() {
        let current = PluginDescriptor::new(exported_init);

        let bad_magic = PluginDescriptor { magic: 0, ..current };
        assert!(bad_magic.mismatch().unwrap().contains("magic"));

        let old_abi = PluginDescriptor {
            abi_version: PLUGIN_ABI_VERSION + 1,
            ..current
        };
        assert!(old_abi.mismatch().unwrap().contains("plugin ABI"));

        let other_build = PluginDescriptor {
            build_id: current.build_id ^ 1,
            ..current
        };
        assert!(other_build.mismatch().unwrap().contains("another pgcat-core"));
    }

    #[test]
    fn shared_initializer_fills_the_table() {
        unsafe extern "C" fn fill(callbacks: *mut OutputPluginCallbacks) {
            if let Some(callbacks) = unsafe { callbacks.as_mut() } {
                callbacks.shutdown = Some(shutdown);
            }
        }

        // SAFETY: `fill` is linked into this binary and matches the layout.
        let init = unsafe { PluginInit::shared(fill) };
        let mut cb = OutputPluginCallbacks::default();
        init.run(&mut cb);
        assert_eq!(cb.populated_slots(), vec!["shutdown"]);
    }

    #[test]
    fn file_that_is_not_a_library_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(format!("decoder.{DLL_EXTENSION}"));
        std::fs::write(&path, b"not a shared object").unwrap();

        let loader = SharedLibraryLoader::new(dir.path());
        let err = loader
            .load_init("$libdir/decoder", "_PG_output_plugin_init")
            .unwrap_err();
        assert!(matches!(err, Error::ModuleLoad { .. }));
    }
}
