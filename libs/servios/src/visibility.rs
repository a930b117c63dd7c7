//! Which methods of a service type a hosting framework may expose.
//!
//! Markings live in a side table keyed by type, filled when a type is
//! registered and read on every call:
//!
//! - a method marked private is never public;
//! - otherwise every method of a class marked public is public, except the
//!   constructor ([`CONSTRUCTOR`]);
//! - otherwise only methods marked public are public.
//!
//! Key = `type_name::<T>()`, same scheme as a type-keyed client hub.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

/// Name of the constructor, never listed as a public method.
pub const CONSTRUCTOR: &str = "new";

#[derive(Clone, Copy, Eq, PartialEq, Hash)]
struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Visibility markings of one type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeVisibility {
    methods: Vec<String>,
    public_class: bool,
    public: Vec<String>,
    private: Vec<String>,
}

impl TypeVisibility {
    #[must_use]
    pub fn builder() -> TypeVisibilityBuilder {
        TypeVisibilityBuilder::default()
    }

    #[must_use]
    pub fn is_public_class(&self) -> bool {
        self.public_class
    }

    #[must_use]
    pub fn is_public(&self, method: &str) -> bool {
        if self.private.iter().any(|m| m == method) {
            return false;
        }
        if self.public_class {
            return method != CONSTRUCTOR;
        }
        self.public.iter().any(|m| m == method)
    }

    /// Public method names.
    ///
    /// A public class lists every declared method except [`CONSTRUCTOR`], in
    /// declaration order. Otherwise the methods marked public are listed in
    /// marking order. Private markings only affect [`Self::is_public`].
    #[must_use]
    pub fn public_methods(&self) -> Vec<String> {
        if self.public_class {
            self.methods
                .iter()
                .filter(|m| *m != CONSTRUCTOR)
                .cloned()
                .collect()
        } else {
            self.public.clone()
        }
    }
}

/// Builder for [`TypeVisibility`].
#[derive(Debug, Default)]
pub struct TypeVisibilityBuilder {
    record: TypeVisibility,
}

fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_owned());
    }
}

impl TypeVisibilityBuilder {
    /// Declare the callable methods of the type.
    #[must_use]
    pub fn methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for method in methods {
            push_unique(&mut self.record.methods, method.as_ref());
        }
        self
    }

    /// Mark the whole type public.
    #[must_use]
    pub fn public_class(mut self) -> Self {
        self.record.public_class = true;
        self
    }

    #[must_use]
    pub fn public(mut self, method: &str) -> Self {
        push_unique(&mut self.record.public, method);
        self
    }

    /// Mark a method private; overrides every public marking.
    #[must_use]
    pub fn private(mut self, method: &str) -> Self {
        push_unique(&mut self.record.private, method);
        self
    }

    #[must_use]
    pub fn build(self) -> TypeVisibility {
        self.record
    }
}

/// A type that declares its own markings.
///
/// ```ignore
/// struct UserService;
///
/// impl ExposedService for UserService {
///     fn visibility() -> TypeVisibility {
///         TypeVisibility::builder()
///             .methods(["new", "list_users", "reset_cache"])
///             .public_class()
///             .private("reset_cache")
///             .build()
///     }
/// }
/// ```
pub trait ExposedService: 'static {
    fn visibility() -> TypeVisibility;
}

/// Type-keyed table of [`TypeVisibility`] records.
#[derive(Default)]
pub struct VisibilityRegistry {
    map: RwLock<HashMap<TypeKey, TypeVisibility>>,
}

impl fmt::Debug for VisibilityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let types: Vec<TypeKey> = self.map.read().keys().copied().collect();
        f.debug_struct("VisibilityRegistry")
            .field("types", &types)
            .finish()
    }
}

static GLOBAL: LazyLock<VisibilityRegistry> = LazyLock::new(VisibilityRegistry::new);

impl VisibilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry shared by hosting frameworks.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Register (or replace) the markings of `T`.
    pub fn register<T: ?Sized + 'static>(&self, visibility: TypeVisibility) {
        let key = TypeKey::of::<T>();
        tracing::debug!(type_name = key.0, public_class = visibility.public_class, "registered method visibility");
        self.map.write().insert(key, visibility);
    }

    pub fn register_service<T: ExposedService>(&self) {
        self.register::<T>(T::visibility());
    }

    /// `false` for types that were never registered.
    #[must_use]
    pub fn is_public<T: ?Sized + 'static>(&self, method: &str) -> bool {
        self.map
            .read()
            .get(&TypeKey::of::<T>())
            .is_some_and(|v| v.is_public(method))
    }

    /// Empty for types that were never registered.
    #[must_use]
    pub fn public_methods<T: ?Sized + 'static>(&self) -> Vec<String> {
        self.map
            .read()
            .get(&TypeKey::of::<T>())
            .map(TypeVisibility::public_methods)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn get<T: ?Sized + 'static>(&self) -> Option<TypeVisibility> {
        self.map.read().get(&TypeKey::of::<T>()).cloned()
    }

    pub fn remove<T: ?Sized + 'static>(&self) -> Option<TypeVisibility> {
        self.map.write().remove(&TypeKey::of::<T>())
    }

    pub fn clear(&self) {
        self.map.write().clear();
    }
}
