//! Descriptors for everything the C front end hands to the inference engine.
//!
//! The parser and AST live in an external tool; what crosses the boundary is
//! a per-translation-unit batch of pre-lowered declarator descriptions. Each
//! descriptor carries exactly the facts inference needs — pointer shape,
//! linkage, interop annotations, macro provenance — and nothing else of the
//! C AST. All types serialize, so a front end can be run once and its output
//! replayed into the engine.

mod psl;

pub use psl::Psl;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use qual_ty::PtrKind;

/// Linkage of a function symbol: external symbols unify by name across the
/// whole program, internal (`static`) symbols by name within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    External,
    Internal,
}

/// One pointer indirection of a declarator, outermost first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PtrLevel {
    /// Qualifier already spelled in the input source, for programs that are
    /// partially converted. An inferred solution never drops below it.
    pub checked: Option<PtrKind>,
}

/// A pointer level spelled through a named typedef.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedefRef {
    pub psl: Psl,
    pub name: SmolStr,
}

/// Shape of a declarator's type as the front end lowered it.
///
/// `levels` is empty for non-pointer declarators; such declarations carry no
/// atoms and are ignored by the engine. When the innermost pointee is a
/// function type, `fn_sig` holds its signature and the levels describe the
/// pointer(s) to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PtrType {
    pub levels: Vec<PtrLevel>,
    /// Spelling of the base type (`"int"`, `"void"`, `"va_list"`, …).
    pub base: SmolStr,
    pub fn_sig: Option<Box<FnSig>>,
    pub typedef: Option<TypedefRef>,
}

impl PtrType {
    /// A non-pointer type; produces no constraint atoms.
    pub fn scalar(base: impl Into<SmolStr>) -> Self {
        PtrType {
            levels: Vec::new(),
            base: base.into(),
            fn_sig: None,
            typedef: None,
        }
    }

    /// A `depth`-deep unannotated pointer to `base`.
    pub fn pointer(base: impl Into<SmolStr>, depth: usize) -> Self {
        PtrType {
            levels: vec![PtrLevel::default(); depth],
            base: base.into(),
            fn_sig: None,
            typedef: None,
        }
    }

    /// Mark the outermost level as already carrying a checked qualifier.
    pub fn with_checked(mut self, kind: PtrKind) -> Self {
        if let Some(level) = self.levels.first_mut() {
            level.checked = Some(kind);
        }
        self
    }

    pub fn with_typedef(mut self, psl: Psl, name: impl Into<SmolStr>) -> Self {
        self.typedef = Some(TypedefRef {
            psl,
            name: name.into(),
        });
        self
    }

    pub fn function_pointer(sig: FnSig, depth: usize) -> Self {
        PtrType {
            levels: vec![PtrLevel::default(); depth],
            base: SmolStr::default(),
            fn_sig: Some(Box::new(sig)),
            typedef: None,
        }
    }

    pub fn is_pointer(&self) -> bool {
        !self.levels.is_empty()
    }

    pub fn is_void(&self) -> bool {
        self.base == "void"
    }

    pub fn is_va_list(&self) -> bool {
        self.base == "va_list"
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// A function parameter as declared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: SmolStr,
    pub psl: Psl,
    pub ty: PtrType,
    /// Interop annotation: the checked external view when the parameter is
    /// declared `… : itype(...)`. The unchecked `ty` stays the internal view.
    pub itype: Option<PtrType>,
    /// Index of the `_Itype_for_any` type variable this parameter is bound
    /// to, when the owning function is generic.
    pub generic_idx: Option<u32>,
    pub in_macro: bool,
}

impl ParamDecl {
    pub fn new(name: impl Into<SmolStr>, psl: Psl, ty: PtrType) -> Self {
        ParamDecl {
            name: name.into(),
            psl,
            ty,
            itype: None,
            generic_idx: None,
            in_macro: false,
        }
    }

    pub fn with_itype(mut self, itype: PtrType) -> Self {
        self.itype = Some(itype);
        self
    }

    pub fn with_generic_idx(mut self, idx: u32) -> Self {
        self.generic_idx = Some(idx);
        self
    }
}

/// A function type as declared: return, parameters, variadicness, and the
/// number of `_Itype_for_any` type parameters (zero for plain functions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnSig {
    pub ret: PtrType,
    pub ret_itype: Option<PtrType>,
    pub ret_generic_idx: Option<u32>,
    pub params: Vec<ParamDecl>,
    pub is_variadic: bool,
    pub type_params: u32,
}

impl FnSig {
    pub fn new(ret: PtrType, params: Vec<ParamDecl>) -> Self {
        FnSig {
            ret,
            ret_itype: None,
            ret_generic_idx: None,
            params,
            is_variadic: false,
            type_params: 0,
        }
    }

    pub fn with_ret_itype(mut self, itype: PtrType) -> Self {
        self.ret_itype = Some(itype);
        self
    }

    pub fn variadic(mut self) -> Self {
        self.is_variadic = true;
        self
    }

    pub fn with_type_params(mut self, n: u32) -> Self {
        self.type_params = n;
        self
    }

    pub fn is_generic(&self) -> bool {
        self.type_params > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: SmolStr,
    pub psl: Psl,
    pub linkage: Linkage,
    pub sig: FnSig,
    pub has_body: bool,
    pub in_macro: bool,
}

impl FunctionDecl {
    pub fn new(name: impl Into<SmolStr>, psl: Psl, sig: FnSig) -> Self {
        FunctionDecl {
            name: name.into(),
            psl,
            linkage: Linkage::External,
            sig,
            has_body: false,
            in_macro: false,
        }
    }

    pub fn with_body(mut self) -> Self {
        self.has_body = true;
        self
    }

    pub fn static_linkage(mut self) -> Self {
        self.linkage = Linkage::Internal;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VarDecl {
    pub name: SmolStr,
    pub psl: Psl,
    pub ty: PtrType,
    /// File-scope (or `static`/`extern`) storage. Global names unify across
    /// translation units.
    pub has_global_storage: bool,
    /// Whether this sighting is a definition (carries an initializer or
    /// tentative definition) rather than an `extern` declaration.
    pub has_definition: bool,
    pub in_macro: bool,
}

impl VarDecl {
    pub fn new(name: impl Into<SmolStr>, psl: Psl, ty: PtrType) -> Self {
        VarDecl {
            name: name.into(),
            psl,
            ty,
            has_global_storage: false,
            has_definition: true,
            in_macro: false,
        }
    }

    pub fn global(mut self) -> Self {
        self.has_global_storage = true;
        self
    }

    pub fn extern_decl(mut self) -> Self {
        self.has_global_storage = true;
        self.has_definition = false;
        self
    }

    pub fn in_macro(mut self) -> Self {
        self.in_macro = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: SmolStr,
    pub psl: Psl,
    pub ty: PtrType,
    pub in_macro: bool,
}

impl FieldDecl {
    pub fn new(name: impl Into<SmolStr>, psl: Psl, ty: PtrType) -> Self {
        FieldDecl {
            name: name.into(),
            psl,
            ty,
            in_macro: false,
        }
    }
}

/// A declarator sighting, exactly one per PSL-unique declaration the front
/// end visits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decl {
    Function(FunctionDecl),
    Var(VarDecl),
    Field(FieldDecl),
}

impl Decl {
    pub fn psl(&self) -> &Psl {
        match self {
            Decl::Function(d) => &d.psl,
            Decl::Var(d) => &d.psl,
            Decl::Field(d) => &d.psl,
        }
    }

    pub fn name(&self) -> &SmolStr {
        match self {
            Decl::Function(d) => &d.name,
            Decl::Var(d) => &d.name,
            Decl::Field(d) => &d.name,
        }
    }

    pub fn in_macro(&self) -> bool {
        match self {
            Decl::Function(d) => d.in_macro,
            Decl::Var(d) => d.in_macro,
            Decl::Field(d) => d.in_macro,
        }
    }
}

/// A named typedef sighting. `should_check` is false for typedefs the front
/// end decided must stay unchecked (e.g. ones expanding to unsupported
/// types); pointers spelled through those do not unify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedefDecl {
    pub psl: Psl,
    pub name: SmolStr,
    pub should_check: bool,
}

/// Everything the front end extracted from one translation unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslationUnit {
    pub path: SmolStr,
    #[serde(default)]
    pub typedefs: Vec<TypedefDecl>,
    pub decls: Vec<Decl>,
}

impl TranslationUnit {
    pub fn new(path: impl Into<SmolStr>) -> Self {
        TranslationUnit {
            path: path.into(),
            typedefs: Vec::new(),
            decls: Vec::new(),
        }
    }

    pub fn with_decl(mut self, decl: Decl) -> Self {
        self.decls.push(decl);
        self
    }

    pub fn with_typedef(mut self, td: TypedefDecl) -> Self {
        self.typedefs.push(td);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_builder_sets_depth() {
        let ty = PtrType::pointer("int", 2);
        assert!(ty.is_pointer());
        assert_eq!(ty.depth(), 2);
        assert!(ty.levels.iter().all(|l| l.checked.is_none()));
    }

    #[test]
    fn scalar_is_not_a_pointer() {
        assert!(!PtrType::scalar("int").is_pointer());
    }

    #[test]
    fn with_checked_marks_outermost_level() {
        let ty = PtrType::pointer("int", 2).with_checked(PtrKind::Ptr);
        assert_eq!(ty.levels[0].checked, Some(PtrKind::Ptr));
        assert_eq!(ty.levels[1].checked, None);
    }

    #[test]
    fn void_and_va_list_detection() {
        assert!(PtrType::pointer("void", 1).is_void());
        assert!(PtrType::scalar("va_list").is_va_list());
        assert!(!PtrType::pointer("int", 1).is_void());
    }

    #[test]
    fn extern_decl_has_no_definition() {
        let d = VarDecl::new("g", Psl::new("a.c", 1, 1), PtrType::pointer("int", 1)).extern_decl();
        assert!(d.has_global_storage);
        assert!(!d.has_definition);
    }

    #[test]
    fn translation_unit_round_trips_through_json() {
        let tu = TranslationUnit::new("a.c")
            .with_typedef(TypedefDecl {
                psl: Psl::new("a.c", 1, 1),
                name: "intptr".into(),
                should_check: true,
            })
            .with_decl(Decl::Var(
                VarDecl::new("p", Psl::new("a.c", 2, 5), PtrType::pointer("int", 1)).global(),
            ))
            .with_decl(Decl::Function(
                FunctionDecl::new(
                    "f",
                    Psl::new("a.c", 3, 1),
                    FnSig::new(
                        PtrType::pointer("int", 1),
                        vec![ParamDecl::new(
                            "x",
                            Psl::new("a.c", 3, 12),
                            PtrType::pointer("int", 1),
                        )],
                    ),
                )
                .with_body(),
            ));

        let json = serde_json::to_string(&tu).unwrap();
        let back: TranslationUnit = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tu);
    }
}
