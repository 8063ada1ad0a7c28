//! Constraint variables: the atom-vector view of one declaration.
//!
//! A pointer declaration owns one atom per indirection level
//! ([`PointerVar`]); a function declaration owns an external and an internal
//! pointer variable for its return and for every parameter
//! ([`FunctionVar`]). The external view is what call sites constrain, the
//! internal view is what the body constrains; the two are equated unless an
//! interop (`itype`) annotation deliberately splits them.
//!
//! Variables live in one arena for the whole program and reference each other
//! by [`CVarId`], so "brain transplanting" a later prototype sighting onto an
//! earlier definition is a plain copy of atom vectors — constraints already
//! attached to either side keep naming the surviving atoms by key.

use la_arena::{Arena, Idx};
use qual_ast::{FnSig, ParamDecl, Psl, PtrType};
use qual_ty::Atom;
use smol_str::SmolStr;

use crate::store::{ConstraintStore, Reason};

pub type CVarId = Idx<ConstraintVar>;

/// Polarity of a relational constraint between two variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsAction {
    /// Bidirectional equality of kinds, in both colorings. Used when two
    /// declarations name the same object (linking, typedef unification).
    SameToSame,
    /// `lhs ⊒ rhs` in the checked coloring only: wildness of the source
    /// taints the target, safety never flows back.
    WildToSame,
    /// `lhs ⊒ rhs` in the pointer-type coloring only: the checked side of an
    /// interop signature feeds the unchecked side without coupling their
    /// checked solutions.
    SafeToWild,
}

#[derive(Debug, Clone)]
pub struct PointerVar {
    name: SmolStr,
    psl: Psl,
    /// One atom per indirection level, outermost first. Levels already
    /// carrying a checked qualifier in the source are constant atoms.
    atoms: Vec<Atom>,
    /// Set when the innermost pointee is a function type.
    fv: Option<CVarId>,
    /// Bound to an `_Itype_for_any` type variable; spared by the linker.
    is_generic: bool,
    valid_decl: bool,
    part_of_fp: bool,
    typedef: Option<(Psl, SmolStr)>,
}

impl PointerVar {
    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn fv(&self) -> Option<CVarId> {
        self.fv
    }

    pub fn is_generic(&self) -> bool {
        self.is_generic
    }

    pub fn typedef(&self) -> Option<&(Psl, SmolStr)> {
        self.typedef.as_ref()
    }

    pub fn is_part_of_function_prototype(&self) -> bool {
        self.part_of_fp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamPair {
    pub external: CVarId,
    pub internal: CVarId,
}

#[derive(Debug, Clone)]
pub struct FunctionVar {
    name: SmolStr,
    file: SmolStr,
    psl: Psl,
    is_static: bool,
    has_body: bool,
    type_params: u32,
    external_return: CVarId,
    internal_return: CVarId,
    params: Vec<ParamPair>,
    valid_decl: bool,
}

impl FunctionVar {
    pub fn name(&self) -> &SmolStr {
        &self.name
    }

    pub fn file(&self) -> &SmolStr {
        &self.file
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }

    pub fn set_has_body(&mut self) {
        self.has_body = true;
    }

    pub fn is_generic(&self) -> bool {
        self.type_params > 0
    }

    pub fn type_params(&self) -> u32 {
        self.type_params
    }

    pub fn external_return(&self) -> CVarId {
        self.external_return
    }

    pub fn internal_return(&self) -> CVarId {
        self.internal_return
    }

    pub fn num_params(&self) -> usize {
        self.params.len()
    }

    pub fn external_param(&self, i: usize) -> Option<CVarId> {
        self.params.get(i).map(|p| p.external)
    }

    pub fn internal_param(&self, i: usize) -> Option<CVarId> {
        self.params.get(i).map(|p| p.internal)
    }

    pub fn params(&self) -> &[ParamPair] {
        &self.params
    }
}

#[derive(Debug, Clone)]
pub enum ConstraintVar {
    Pointer(PointerVar),
    Function(FunctionVar),
}

impl ConstraintVar {
    pub fn name(&self) -> &SmolStr {
        match self {
            ConstraintVar::Pointer(p) => &p.name,
            ConstraintVar::Function(f) => &f.name,
        }
    }

    pub fn psl(&self) -> &Psl {
        match self {
            ConstraintVar::Pointer(p) => &p.psl,
            ConstraintVar::Function(f) => &f.psl,
        }
    }

    pub fn is_valid_decl(&self) -> bool {
        match self {
            ConstraintVar::Pointer(p) => p.valid_decl,
            ConstraintVar::Function(f) => f.valid_decl,
        }
    }

    pub fn set_valid_decl(&mut self) {
        match self {
            ConstraintVar::Pointer(p) => p.valid_decl = true,
            ConstraintVar::Function(f) => f.valid_decl = true,
        }
    }

    pub fn as_pointer(&self) -> Option<&PointerVar> {
        match self {
            ConstraintVar::Pointer(p) => Some(p),
            ConstraintVar::Function(_) => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionVar> {
        match self {
            ConstraintVar::Function(f) => Some(f),
            ConstraintVar::Pointer(_) => None,
        }
    }
}

// ==============================================================================
// Construction
// ==============================================================================

/// Allocate a pointer variable shaped like `ty`. Levels whose source already
/// spelled a checked qualifier become constant atoms and stay that kind.
pub(crate) fn pvc_from_type(
    arena: &mut Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    name: &SmolStr,
    psl: &Psl,
    ty: &PtrType,
    part_of_fp: bool,
    is_generic: bool,
) -> CVarId {
    let atoms = ty
        .levels
        .iter()
        .map(|level| match level.checked {
            Some(kind) => Atom::Const(kind),
            None => cs.mk_var(),
        })
        .collect();

    let fv = ty.fn_sig.as_ref().map(|sig| {
        fvc_from_sig(
            arena,
            cs,
            name,
            &psl.file,
            psl,
            sig,
            /* is_static */ false,
            /* has_body */ false,
        )
    });

    arena.alloc(ConstraintVar::Pointer(PointerVar {
        name: name.clone(),
        psl: psl.clone(),
        atoms,
        fv,
        is_generic,
        valid_decl: false,
        part_of_fp,
        typedef: ty
            .typedef
            .as_ref()
            .map(|td| (td.psl.clone(), td.name.clone())),
    }))
}

/// Allocate a function variable: external/internal pointer variables for the
/// return and each parameter. With no interop annotation the two views are
/// equated; with one, the checked external view feeds the internal view in
/// exactly one direction so the body can stay unchecked.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fvc_from_sig(
    arena: &mut Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    name: &SmolStr,
    file: &SmolStr,
    psl: &Psl,
    sig: &FnSig,
    is_static: bool,
    has_body: bool,
) -> CVarId {
    let ret_generic = sig.ret_generic_idx.is_some();
    let internal_return = pvc_from_type(arena, cs, name, psl, &sig.ret, true, ret_generic);
    let external_return = alloc_external_view(
        arena,
        cs,
        name,
        psl,
        &sig.ret,
        sig.ret_itype.as_ref(),
        ret_generic,
        internal_return,
    );

    let params = sig
        .params
        .iter()
        .map(|p| alloc_param_pair(arena, cs, p))
        .collect();

    arena.alloc(ConstraintVar::Function(FunctionVar {
        name: name.clone(),
        file: file.clone(),
        psl: psl.clone(),
        is_static,
        has_body,
        type_params: sig.type_params,
        external_return,
        internal_return,
        params,
        valid_decl: false,
    }))
}

fn alloc_param_pair(
    arena: &mut Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    param: &ParamDecl,
) -> ParamPair {
    let generic = param.generic_idx.is_some();
    let internal = pvc_from_type(arena, cs, &param.name, &param.psl, &param.ty, true, generic);
    let external = alloc_external_view(
        arena,
        cs,
        &param.name,
        &param.psl,
        &param.ty,
        param.itype.as_ref(),
        generic,
        internal,
    );
    ParamPair { external, internal }
}

#[allow(clippy::too_many_arguments)]
fn alloc_external_view(
    arena: &mut Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    name: &SmolStr,
    psl: &Psl,
    ty: &PtrType,
    itype: Option<&PtrType>,
    is_generic: bool,
    internal: CVarId,
) -> CVarId {
    match itype {
        Some(it) => {
            let external = pvc_from_type(arena, cs, name, psl, it, true, is_generic);
            link_interop(arena, cs, internal, external, psl);
            external
        }
        None => {
            let external = pvc_from_type(arena, cs, name, psl, ty, true, is_generic);
            constrain_cons_var_geq(
                arena,
                cs,
                external,
                internal,
                ConsAction::SameToSame,
                "Function declaration",
                Some(psl),
            );
            external
        }
    }
}

/// One-directional interop link: `internal ⊒ external` in both colorings.
/// The declared checked kind lower-bounds the body's view; the body going
/// wild never taints the signature.
fn link_interop(
    arena: &Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    internal: CVarId,
    external: CVarId,
    psl: &Psl,
) {
    let (Some(int_pvc), Some(ext_pvc)) = (arena[internal].as_pointer(), arena[external].as_pointer())
    else {
        return;
    };
    let pairs: Vec<(Atom, Atom)> = int_pvc
        .atoms
        .iter()
        .copied()
        .zip(ext_pvc.atoms.iter().copied())
        .collect();
    for (int_atom, ext_atom) in pairs {
        let reason = Reason::new("Interop type annotation", Some(psl));
        cs.add_geq(int_atom, ext_atom, true, reason.clone());
        cs.add_geq(int_atom, ext_atom, false, reason);
    }
}

// ==============================================================================
// Operations
// ==============================================================================

/// Force every atom owned by the variable to wild, transitively through any
/// embedded function variable.
pub(crate) fn constrain_to_wild(
    arena: &Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    id: CVarId,
    reason: &str,
    loc: Option<&Psl>,
) {
    match &arena[id] {
        ConstraintVar::Pointer(p) => {
            let atoms = p.atoms.clone();
            let fv = p.fv;
            for atom in atoms {
                if atom.is_var() {
                    cs.add_geq(atom, Atom::WILD, true, Reason::new(reason, loc));
                }
            }
            if let Some(fv) = fv {
                constrain_to_wild(arena, cs, fv, reason, loc);
            }
        }
        ConstraintVar::Function(f) => {
            let mut children = vec![f.external_return, f.internal_return];
            for pair in &f.params {
                children.push(pair.external);
                children.push(pair.internal);
            }
            for child in children {
                constrain_to_wild(arena, cs, child, reason, loc);
            }
        }
    }
}

/// Replace `new`'s atoms with `old`'s, pointwise and recursively. Used when
/// two sightings are discovered to name the same semantic object so that all
/// subsequent constraints accumulate on one atom identity. `old` keeps its
/// vector and remains usable as a view.
pub(crate) fn brain_transplant(arena: &mut Arena<ConstraintVar>, new: CVarId, old: CVarId) {
    enum Step {
        Pointer(Vec<Atom>, Option<(CVarId, CVarId)>),
        Function(Vec<(CVarId, CVarId)>),
    }

    let step = match (&arena[new], &arena[old]) {
        (ConstraintVar::Pointer(n), ConstraintVar::Pointer(o)) => {
            let fv_pair = match (n.fv, o.fv) {
                (Some(nf), Some(of)) => Some((nf, of)),
                _ => None,
            };
            Step::Pointer(o.atoms.clone(), fv_pair)
        }
        (ConstraintVar::Function(n), ConstraintVar::Function(o)) => {
            let mut pairs = vec![
                (n.external_return, o.external_return),
                (n.internal_return, o.internal_return),
            ];
            for (np, op) in n.params.iter().zip(o.params.iter()) {
                pairs.push((np.external, op.external));
                pairs.push((np.internal, op.internal));
            }
            Step::Function(pairs)
        }
        // Shapes disagree only if the front end produced inconsistent
        // descriptors for one symbol; nothing sensible to adopt.
        _ => return,
    };

    match step {
        Step::Pointer(atoms, fv_pair) => {
            if let ConstraintVar::Pointer(n) = &mut arena[new] {
                n.atoms = atoms;
            }
            if let Some((nf, of)) = fv_pair {
                brain_transplant(arena, nf, of);
            }
        }
        Step::Function(pairs) => {
            for (n, o) in pairs {
                brain_transplant(arena, n, o);
            }
        }
    }
}

/// Reconcile two prototype sightings of one function. On success the two are
/// equated constraint-wise and `dst` absorbs `src`'s definition status; on
/// failure the returned reason names what could not be reconciled.
pub(crate) fn merge_declaration(
    arena: &mut Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    dst: CVarId,
    src: CVarId,
) -> Result<(), String> {
    let (dst_fv, src_fv) = match (&arena[dst], &arena[src]) {
        (ConstraintVar::Function(d), ConstraintVar::Function(s)) => (d.clone(), s.clone()),
        _ => return Err("declarations have different shapes".to_string()),
    };

    if dst_fv.params.len() != src_fv.params.len() {
        return Err(format!(
            "declarations have {} and {} parameters",
            dst_fv.params.len(),
            src_fv.params.len()
        ));
    }
    if dst_fv.type_params != src_fv.type_params {
        return Err("declarations disagree on generic type parameters".to_string());
    }
    if let Some((d, s)) = interop_typedef_conflict(arena, &dst_fv, &src_fv) {
        return Err(format!("declarations spell interop types through different typedefs ({d} vs {s})"));
    }

    let psl = src_fv.psl.clone();
    let mut pairs = vec![
        (dst_fv.external_return, src_fv.external_return),
        (dst_fv.internal_return, src_fv.internal_return),
    ];
    for (dp, sp) in dst_fv.params.iter().zip(src_fv.params.iter()) {
        pairs.push((dp.external, sp.external));
        pairs.push((dp.internal, sp.internal));
    }
    for (d, s) in pairs {
        constrain_cons_var_geq(
            arena,
            cs,
            d,
            s,
            ConsAction::SameToSame,
            "Merged declaration",
            Some(&psl),
        );
    }

    if let ConstraintVar::Function(d) = &mut arena[dst] {
        d.has_body |= src_fv.has_body;
        d.valid_decl |= src_fv.valid_decl;
    }
    Ok(())
}

fn interop_typedef_conflict(
    arena: &Arena<ConstraintVar>,
    a: &FunctionVar,
    b: &FunctionVar,
) -> Option<(SmolStr, SmolStr)> {
    let typedef_of = |id: CVarId| {
        arena[id]
            .as_pointer()
            .and_then(|p| p.typedef.as_ref())
            .map(|(_, name)| name.clone())
    };
    let mut pairs = vec![(a.external_return, b.external_return)];
    for (ap, bp) in a.params.iter().zip(b.params.iter()) {
        pairs.push((ap.external, bp.external));
    }
    for (av, bv) in pairs {
        if let (Some(an), Some(bn)) = (typedef_of(av), typedef_of(bv)) {
            if an != bn {
                return Some((an, bn));
            }
        }
    }
    None
}

pub(crate) fn set_typedef(arena: &mut Arena<ConstraintVar>, id: CVarId, psl: Psl, name: SmolStr) {
    if let ConstraintVar::Pointer(p) = &mut arena[id] {
        p.typedef = Some((psl, name));
    }
}

/// All atoms reachable from a constraint variable: a pointer variable's own
/// levels plus, transitively, its embedded function variable; a function
/// variable's external return and parameters.
pub fn collect_atoms(arena: &Arena<ConstraintVar>, id: CVarId, out: &mut Vec<Atom>) {
    match &arena[id] {
        ConstraintVar::Pointer(p) => {
            out.extend(p.atoms.iter().copied());
            if let Some(fv) = p.fv {
                collect_atoms(arena, fv, out);
            }
        }
        ConstraintVar::Function(f) => {
            collect_atoms(arena, f.external_return, out);
            for pair in &f.params {
                collect_atoms(arena, pair.external, out);
            }
        }
    }
}

// ==============================================================================
// Relational constraints
// ==============================================================================

/// Emit per-level `Geq` constraints relating two constraint variables.
///
/// Pointer variables walk their atom vectors in parallel; function variables
/// recurse covariantly into returns and contravariantly into parameters
/// (operands swap). A depth or arity mismatch wilds the surplus side, and an
/// embedded function pointer present on only one side wilds both.
pub(crate) fn constrain_cons_var_geq(
    arena: &Arena<ConstraintVar>,
    cs: &mut ConstraintStore,
    lhs: CVarId,
    rhs: CVarId,
    action: ConsAction,
    reason: &str,
    loc: Option<&Psl>,
) {
    match (&arena[lhs], &arena[rhs]) {
        (ConstraintVar::Pointer(l), ConstraintVar::Pointer(r)) => {
            let l_atoms = l.atoms.clone();
            let r_atoms = r.atoms.clone();
            let (l_fv, r_fv) = (l.fv, r.fv);

            for (&la, &ra) in l_atoms.iter().zip(r_atoms.iter()) {
                constrain_atom_geq(cs, la, ra, action, reason, loc);
            }
            let surplus = if l_atoms.len() > r_atoms.len() {
                &l_atoms[r_atoms.len()..]
            } else {
                &r_atoms[l_atoms.len()..]
            };
            for &atom in surplus {
                if atom.is_var() {
                    cs.add_geq(
                        atom,
                        Atom::WILD,
                        true,
                        Reason::new("Pointers have different depths", loc),
                    );
                }
            }

            match (l_fv, r_fv) {
                (Some(lf), Some(rf)) => {
                    constrain_cons_var_geq(arena, cs, lf, rf, action, reason, loc);
                }
                (None, None) => {}
                _ => {
                    constrain_to_wild(arena, cs, lhs, "Function pointer on one side only", loc);
                    constrain_to_wild(arena, cs, rhs, "Function pointer on one side only", loc);
                }
            }
        }

        (ConstraintVar::Function(l), ConstraintVar::Function(r)) => {
            let l = l.clone();
            let r = r.clone();

            // Return is covariant.
            constrain_cons_var_geq(
                arena,
                cs,
                l.external_return,
                r.external_return,
                action,
                reason,
                loc,
            );

            // Parameters are contravariant: operands swap.
            let shared = l.params.len().min(r.params.len());
            for i in 0..shared {
                constrain_cons_var_geq(
                    arena,
                    cs,
                    r.params[i].external,
                    l.params[i].external,
                    action,
                    reason,
                    loc,
                );
            }
            let surplus = if l.params.len() > r.params.len() {
                &l.params[shared..]
            } else {
                &r.params[shared..]
            };
            for pair in surplus {
                constrain_to_wild(arena, cs, pair.external, "Mismatched parameter lists", loc);
                constrain_to_wild(arena, cs, pair.internal, "Mismatched parameter lists", loc);
            }
        }

        _ => {
            constrain_to_wild(arena, cs, lhs, "Incompatible constraint variable shapes", loc);
            constrain_to_wild(arena, cs, rhs, "Incompatible constraint variable shapes", loc);
        }
    }
}

fn constrain_atom_geq(
    cs: &mut ConstraintStore,
    lhs: Atom,
    rhs: Atom,
    action: ConsAction,
    reason: &str,
    loc: Option<&Psl>,
) {
    let rsn = Reason::new(reason, loc);
    match action {
        ConsAction::SameToSame => {
            cs.add_eq(lhs, rhs, true, rsn.clone());
            cs.add_eq(lhs, rhs, false, rsn);
        }
        ConsAction::WildToSame => {
            cs.add_geq(lhs, rhs, true, rsn);
        }
        ConsAction::SafeToWild => {
            cs.add_geq(lhs, rhs, false, rsn);
        }
    }
}
