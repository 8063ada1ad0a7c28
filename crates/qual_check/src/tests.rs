//! End-to-end scenarios driving the public engine API the way the front end
//! does: descriptor literals stand in for parsed translation units, and
//! visitor-emitted constraints are added through the same entry points the
//! visitor uses.

use qual_ast::{
    Decl, FieldDecl, FnSig, FunctionDecl, Linkage, ParamDecl, Psl, PtrType, TranslationUnit,
    TypedefDecl, VarDecl,
};
use qual_ty::{Atom, PtrKind};
use smol_str::SmolStr;

use crate::cvar::CVarId;
use crate::store::Reason;
use crate::{ConsAction, ConvertOptions, EngineError, ProgramInfo};

fn psl(file: &str, line: u32) -> Psl {
    Psl::new(file, line, 1)
}

fn engine() -> ProgramInfo {
    ProgramInfo::new(ConvertOptions::default())
}

fn engine_with(units: &[TranslationUnit]) -> ProgramInfo {
    let mut pi = engine();
    pi.build_initial_constraints(units).unwrap();
    pi
}

fn run_all(pi: &mut ProgramInfo) {
    pi.link().unwrap();
    pi.solve_constraints().unwrap();
    pi.compute_interim_constraint_state();
}

fn var_at(pi: &ProgramInfo, loc: &Psl) -> CVarId {
    pi.variables()
        .find(|(p, _)| *p == loc)
        .unwrap_or_else(|| panic!("no variable registered at {loc}"))
        .1
}

fn first_atom(pi: &ProgramInfo, id: CVarId) -> Atom {
    pi.atoms_of(id)[0]
}

fn kind_at(pi: &ProgramInfo, loc: &Psl) -> PtrKind {
    let id = var_at(pi, loc);
    pi.constraints().assignment(first_atom(pi, id))
}

// ==============================================================================
// Seed scenarios
// ==============================================================================

#[test]
fn unconstrained_local_solves_to_single_object_pointer() {
    // int *p = malloc(sizeof(int)); *p = 3;  — nothing forces p off the
    // safe default.
    let p_loc = psl("a.c", 2);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(VarDecl::new(
        "p",
        p_loc.clone(),
        PtrType::pointer("int", 1),
    )));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);
    assert_eq!(kind_at(&pi, &p_loc), PtrKind::Ptr);
}

#[test]
fn indexed_pointer_solves_to_array() {
    // int *y = calloc(5, ...); y[i] = i;  — the visitor emits an array
    // lower bound for the subscript use.
    let y_loc = psl("a.c", 3);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(VarDecl::new(
        "y",
        y_loc.clone(),
        PtrType::pointer("int", 1),
    )));
    let mut pi = engine_with(&[tu]);
    let atom = first_atom(&pi, var_at(&pi, &y_loc));
    pi.constraints_mut()
        .add_geq(atom, Atom::ARR, true, Reason::new("Pointer is indexed", None));
    run_all(&mut pi);
    assert_eq!(kind_at(&pi, &y_loc), PtrKind::Arr);
}

#[test]
fn cross_unit_wildness_blames_the_callee_return() {
    // a.c defines sus(); b.c stores its result in z and does arithmetic the
    // callee never promised. z goes wild, blamed on the return atom.
    let sus_loc = psl("a.c", 1);
    let z_loc = psl("b.c", 3);
    let units = [
        TranslationUnit::new("a.c").with_decl(Decl::Function(
            FunctionDecl::new(
                "sus",
                sus_loc,
                FnSig::new(PtrType::pointer("int", 1), vec![]),
            )
            .with_body(),
        )),
        TranslationUnit::new("b.c").with_decl(Decl::Var(VarDecl::new(
            "z",
            z_loc.clone(),
            PtrType::pointer("int", 1),
        ))),
    ];
    let mut pi = engine_with(&units);

    let sus = pi
        .get_func_constraint("sus", "a.c", Linkage::External)
        .unwrap();
    let ext_ret = pi.cvar(sus).as_function().unwrap().external_return();
    let z = var_at(&pi, &z_loc);
    pi.constrain_cons_var_geq(
        z,
        ext_ret,
        ConsAction::SameToSame,
        "Assigned from call",
        Some(&z_loc),
    );
    pi.constrain_to_wild(ext_ret, "Unchecked cast of return value", Some(&z_loc));
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &z_loc), PtrKind::Wild);
    let ret_key = first_atom(&pi, ext_ret).as_var().unwrap();
    let z_key = first_atom(&pi, z).as_var().unwrap();
    let state = pi.constraint_state();
    assert!(state.rc_map[&z_key].contains(&ret_key));
    assert!(state.src_w_map[&ret_key].contains(&z_key));
    // The pointer-level projection names z's declaration among the victims.
    assert!(state.ptr_src_w_map[&ret_key].contains(&z));
}

#[test]
fn undefined_extern_global_goes_wild_with_reason() {
    let g_loc = psl("a.c", 1);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(
        VarDecl::new("g", g_loc.clone(), PtrType::pointer("int", 1)).extern_decl(),
    ));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &g_loc), PtrKind::Wild);
    let key = first_atom(&pi, var_at(&pi, &g_loc)).as_var().unwrap();
    let info = &pi.constraint_state().root_wild_atoms_with_reason[&key];
    assert_eq!(
        info.reason,
        "External global variable g has no definition"
    );
}

#[test]
fn defined_global_seen_as_extern_elsewhere_stays_checked() {
    // extern in one unit, defined in another; the two sightings unify and
    // neither goes wild.
    let decl_loc = psl("a.c", 1);
    let def_loc = psl("b.c", 1);
    let units = [
        TranslationUnit::new("a.c").with_decl(Decl::Var(
            VarDecl::new("g", decl_loc.clone(), PtrType::pointer("int", 1)).extern_decl(),
        )),
        TranslationUnit::new("b.c").with_decl(Decl::Var(
            VarDecl::new("g", def_loc.clone(), PtrType::pointer("int", 1)).global(),
        )),
    ];
    let mut pi = engine_with(&units);
    run_all(&mut pi);
    assert_eq!(kind_at(&pi, &decl_loc), PtrKind::Ptr);
    assert_eq!(kind_at(&pi, &def_loc), PtrKind::Ptr);
}

#[test]
fn duplicate_definition_is_a_structured_error() {
    let sig = || FnSig::new(PtrType::pointer("int", 1), vec![]);
    let units = [
        TranslationUnit::new("a.c").with_decl(Decl::Function(
            FunctionDecl::new("f", psl("a.c", 1), sig()).with_body(),
        )),
        TranslationUnit::new("b.c").with_decl(Decl::Function(
            FunctionDecl::new("f", psl("b.c", 1), sig()).with_body(),
        )),
    ];
    let mut pi = engine();
    let err = pi.build_initial_constraints(&units).unwrap_err();
    assert!(matches!(
        err,
        EngineError::DuplicateDefinition { ref name, .. } if name == "f"
    ));
}

#[test]
fn type_param_bindings_record_once_per_call_site() {
    let call = psl("t.c", 14);
    let other_call = psl("t.c", 20);
    let mut pi = engine();
    let arg = pi.make_pointer_var(
        &SmolStr::new("a"),
        &psl("t.c", 10),
        &PtrType::pointer("int", 1),
    );
    pi.set_type_param_binding(&call, 0, arg);

    assert!(pi.has_type_param_bindings(&call));
    assert_eq!(pi.get_type_param_bindings(&call).unwrap()[&0], arg);
    // The call whose argument was not a pointer never got a binding, so no
    // type argument is synthesized for it.
    assert!(!pi.has_type_param_bindings(&other_call));
}

#[test]
#[should_panic(expected = "rewritten")]
fn type_param_binding_cannot_be_overwritten() {
    let call = psl("t.c", 14);
    let mut pi = engine();
    let arg = pi.make_pointer_var(
        &SmolStr::new("a"),
        &psl("t.c", 10),
        &PtrType::pointer("int", 1),
    );
    pi.set_type_param_binding(&call, 0, arg);
    pi.set_type_param_binding(&call, 0, arg);
}

// ==============================================================================
// Linking
// ==============================================================================

fn generic_callee() -> FunctionDecl {
    FunctionDecl::new(
        "test_single",
        psl("h.c", 1),
        FnSig::new(
            PtrType::pointer("void", 1),
            vec![
                ParamDecl::new("a", Psl::new("h.c", 1, 20), PtrType::pointer("void", 1))
                    .with_itype(PtrType::pointer("void", 1).with_checked(PtrKind::Ptr))
                    .with_generic_idx(0),
                ParamDecl::new("b", Psl::new("h.c", 1, 40), PtrType::pointer("void", 1))
                    .with_itype(PtrType::pointer("void", 1).with_checked(PtrKind::Ptr))
                    .with_generic_idx(0),
            ],
        )
        .with_ret_itype(PtrType::pointer("void", 1).with_checked(PtrKind::Ptr))
        .with_type_params(1),
    )
}

#[test]
fn bodyless_extern_wilds_internals_but_spares_generic_externals() {
    let tu = TranslationUnit::new("h.c").with_decl(Decl::Function(generic_callee()));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    let f = pi
        .get_func_constraint("test_single", "h.c", Linkage::External)
        .unwrap();
    let fv = pi.cvar(f).as_function().unwrap();
    let internal = first_atom(&pi, fv.internal_param(0).unwrap());
    let external = first_atom(&pi, fv.external_param(0).unwrap());
    assert_eq!(pi.constraints().assignment(internal), PtrKind::Wild);
    // The annotated external view keeps its declared checked kind.
    assert_eq!(pi.constraints().assignment(external), PtrKind::Ptr);
}

#[test]
fn bodyless_plain_extern_wilds_both_views() {
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Function(FunctionDecl::new(
        "ext",
        psl("a.c", 1),
        FnSig::new(
            PtrType::scalar("void"),
            vec![ParamDecl::new(
                "p",
                Psl::new("a.c", 1, 14),
                PtrType::pointer("int", 1),
            )],
        ),
    )));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    let f = pi.get_func_constraint("ext", "a.c", Linkage::External).unwrap();
    let fv = pi.cvar(f).as_function().unwrap();
    for id in [fv.internal_param(0).unwrap(), fv.external_param(0).unwrap()] {
        assert_eq!(
            pi.constraints().assignment(first_atom(&pi, id)),
            PtrKind::Wild
        );
    }
}

#[test]
fn bodyless_static_follows_the_same_policy_in_its_file() {
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Function(
        FunctionDecl::new(
            "helper",
            psl("a.c", 4),
            FnSig::new(
                PtrType::pointer("int", 1),
                vec![ParamDecl::new(
                    "p",
                    Psl::new("a.c", 4, 20),
                    PtrType::pointer("int", 1),
                )],
            ),
        )
        .static_linkage(),
    ));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    let f = pi
        .get_func_constraint("helper", "a.c", Linkage::Internal)
        .unwrap();
    let fv = pi.cvar(f).as_function().unwrap();
    for id in [
        fv.internal_return(),
        fv.external_return(),
        fv.internal_param(0).unwrap(),
        fv.external_param(0).unwrap(),
    ] {
        assert_eq!(
            pi.constraints().assignment(first_atom(&pi, id)),
            PtrKind::Wild
        );
    }
}

#[test]
fn linker_is_idempotent_on_the_store() {
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(
        VarDecl::new("g", psl("a.c", 1), PtrType::pointer("int", 1)).extern_decl(),
    ));
    let mut pi = engine_with(&[tu]);
    pi.link().unwrap();
    let after_first = pi.constraints().len();
    pi.link().unwrap();
    assert_eq!(pi.constraints().len(), after_first);
}

#[test]
fn prototype_and_definition_share_atoms() {
    let proto_loc = psl("f.h", 1);
    let def_loc = psl("f.c", 10);
    let sig = || {
        FnSig::new(
            PtrType::pointer("int", 1),
            vec![ParamDecl::new(
                "x",
                Psl::new("f.h", 1, 20),
                PtrType::pointer("int", 1),
            )],
        )
    };
    let sig_def = || {
        FnSig::new(
            PtrType::pointer("int", 1),
            vec![ParamDecl::new(
                "x",
                Psl::new("f.c", 10, 20),
                PtrType::pointer("int", 1),
            )],
        )
    };
    let units = [
        TranslationUnit::new("f.h")
            .with_decl(Decl::Function(FunctionDecl::new("f", proto_loc.clone(), sig()))),
        TranslationUnit::new("f.c").with_decl(Decl::Function(
            FunctionDecl::new("f", def_loc.clone(), sig_def()).with_body(),
        )),
    ];
    let pi = engine_with(&units);

    let proto = var_at(&pi, &proto_loc);
    let def = var_at(&pi, &def_loc);
    assert_eq!(pi.atoms_of(proto), pi.atoms_of(def));

    // The map entry is the definition.
    let mapped = pi.get_func_constraint("f", "f.c", Linkage::External).unwrap();
    assert!(pi.cvar(mapped).as_function().unwrap().has_body());
}

#[test]
fn merge_conflict_surfaces_as_structured_error() {
    let units = [
        TranslationUnit::new("a.c").with_decl(Decl::Function(FunctionDecl::new(
            "f",
            psl("a.c", 1),
            FnSig::new(
                PtrType::scalar("void"),
                vec![ParamDecl::new(
                    "x",
                    Psl::new("a.c", 1, 14),
                    PtrType::pointer("int", 1),
                )],
            ),
        ))),
        TranslationUnit::new("b.c").with_decl(Decl::Function(FunctionDecl::new(
            "f",
            psl("b.c", 1),
            FnSig::new(
                PtrType::scalar("void"),
                vec![
                    ParamDecl::new("x", Psl::new("b.c", 1, 14), PtrType::pointer("int", 1)),
                    ParamDecl::new("y", Psl::new("b.c", 1, 30), PtrType::pointer("int", 1)),
                ],
            ),
        ))),
    ];
    let mut pi = engine();
    let err = pi.build_initial_constraints(&units).unwrap_err();
    assert!(matches!(err, EngineError::MergeConflict { ref name, .. } if name == "f"));
}

#[test]
fn later_prototype_is_preferred_over_empty_parameter_list() {
    // f(); followed by f(int *x); — the specific prototype takes the map
    // slot, adopting the old atoms.
    let units = [
        TranslationUnit::new("a.c").with_decl(Decl::Function(FunctionDecl::new(
            "f",
            psl("a.c", 1),
            FnSig::new(PtrType::pointer("int", 1), vec![]),
        ))),
        TranslationUnit::new("b.c").with_decl(Decl::Function(FunctionDecl::new(
            "f",
            psl("b.c", 1),
            FnSig::new(
                PtrType::pointer("int", 1),
                vec![ParamDecl::new(
                    "x",
                    Psl::new("b.c", 1, 14),
                    PtrType::pointer("int", 1),
                )],
            ),
        ))),
    ];
    let pi = engine_with(&units);
    let f = pi.get_func_constraint("f", "b.c", Linkage::External).unwrap();
    assert_eq!(pi.cvar(f).as_function().unwrap().num_params(), 1);
}

// ==============================================================================
// Declaration intake
// ==============================================================================

#[test]
fn duplicate_psl_outside_macro_wilds_the_existing_entry() {
    let loc = psl("a.c", 5);
    let tu = TranslationUnit::new("a.c")
        .with_decl(Decl::Var(VarDecl::new(
            "p",
            loc.clone(),
            PtrType::pointer("int", 1),
        )))
        .with_decl(Decl::Var(VarDecl::new(
            "q",
            loc.clone(),
            PtrType::pointer("int", 1),
        )));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    // One entry per PSL; the survivor is the first sighting, now wild.
    assert_eq!(pi.variables().count(), 1);
    assert_eq!(kind_at(&pi, &loc), PtrKind::Wild);
    assert_eq!(pi.cvar(var_at(&pi, &loc)).name(), "p");
}

#[test]
fn macro_declaration_goes_wild() {
    let loc = psl("a.c", 7);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(
        VarDecl::new("m", loc.clone(), PtrType::pointer("int", 1)).in_macro(),
    ));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &loc), PtrKind::Wild);
    let key = first_atom(&pi, var_at(&pi, &loc)).as_var().unwrap();
    let info = &pi.constraint_state().root_wild_atoms_with_reason[&key];
    assert_eq!(info.reason, "Pointer in Macro declaration.");
}

#[test]
fn declaration_in_non_writable_file_goes_wild() {
    let opts = ConvertOptions {
        base_dir: "/proj".into(),
        ..ConvertOptions::default()
    };
    let inside = Psl::new("/proj/a.c", 1, 1);
    let outside = Psl::new("/usr/include/lib.h", 4, 1);
    let units = [
        TranslationUnit::new("/proj/a.c")
            .with_decl(Decl::Var(VarDecl::new(
                "p",
                inside.clone(),
                PtrType::pointer("int", 1),
            )))
            .with_decl(Decl::Var(VarDecl::new(
                "q",
                outside.clone(),
                PtrType::pointer("int", 1),
            ))),
    ];
    let mut pi = ProgramInfo::new(opts);
    pi.build_initial_constraints(&units).unwrap();
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &inside), PtrKind::Ptr);
    assert_eq!(kind_at(&pi, &outside), PtrKind::Wild);
}

#[test]
fn void_pointer_outside_generic_binding_goes_wild() {
    let loc = psl("a.c", 2);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(VarDecl::new(
        "v",
        loc.clone(),
        PtrType::pointer("void", 1),
    )));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);
    assert_eq!(kind_at(&pi, &loc), PtrKind::Wild);
}

#[test]
fn variadic_function_goes_wild_without_the_flag() {
    let make_units = || {
        [TranslationUnit::new("a.c").with_decl(Decl::Function(
            FunctionDecl::new(
                "printfish",
                psl("a.c", 1),
                FnSig::new(
                    PtrType::scalar("int"),
                    vec![ParamDecl::new(
                        "fmt",
                        Psl::new("a.c", 1, 20),
                        PtrType::pointer("char", 1),
                    )],
                )
                .variadic(),
            )
            .with_body(),
        ))]
    };

    let mut pi = engine_with(&make_units());
    run_all(&mut pi);
    let f = pi
        .get_func_constraint("printfish", "a.c", Linkage::External)
        .unwrap();
    let param = pi.cvar(f).as_function().unwrap().internal_param(0).unwrap();
    assert_eq!(pi.constraints().assignment(first_atom(&pi, param)), PtrKind::Wild);

    let opts = ConvertOptions {
        handle_varargs: true,
        ..ConvertOptions::default()
    };
    let mut pi = ProgramInfo::new(opts);
    pi.build_initial_constraints(&make_units()).unwrap();
    run_all(&mut pi);
    let f = pi
        .get_func_constraint("printfish", "a.c", Linkage::External)
        .unwrap();
    let param = pi.cvar(f).as_function().unwrap().internal_param(0).unwrap();
    assert_eq!(pi.constraints().assignment(first_atom(&pi, param)), PtrKind::Ptr);
}

#[test]
fn struct_field_gets_a_variable() {
    let loc = psl("a.c", 12);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Field(FieldDecl::new(
        "next",
        loc.clone(),
        PtrType::pointer("struct node", 1),
    )));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);
    assert_eq!(kind_at(&pi, &loc), PtrKind::Ptr);
}

#[test]
fn pointers_spelled_through_one_typedef_unify() {
    let td_loc = psl("a.c", 1);
    let a_loc = psl("a.c", 3);
    let b_loc = psl("a.c", 4);
    let spelled = |loc: &Psl, name: &str| {
        Decl::Var(VarDecl::new(
            name,
            loc.clone(),
            PtrType::pointer("int", 1).with_typedef(td_loc.clone(), "intp"),
        ))
    };
    let tu = TranslationUnit::new("a.c")
        .with_typedef(TypedefDecl {
            psl: td_loc.clone(),
            name: "intp".into(),
            should_check: true,
        })
        .with_decl(spelled(&a_loc, "a"))
        .with_decl(spelled(&b_loc, "b"));
    let mut pi = engine_with(&[tu]);

    let a_atom = first_atom(&pi, var_at(&pi, &a_loc));
    pi.constraints_mut()
        .add_geq(a_atom, Atom::ARR, true, Reason::new("Pointer is indexed", None));
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &a_loc), PtrKind::Arr);
    assert_eq!(kind_at(&pi, &b_loc), PtrKind::Arr);
}

#[test]
fn unchecked_typedefs_do_not_unify() {
    let td_loc = psl("a.c", 1);
    let a_loc = psl("a.c", 3);
    let b_loc = psl("a.c", 4);
    let spelled = |loc: &Psl, name: &str| {
        Decl::Var(VarDecl::new(
            name,
            loc.clone(),
            PtrType::pointer("int", 1).with_typedef(td_loc.clone(), "intp"),
        ))
    };
    let tu = TranslationUnit::new("a.c")
        .with_typedef(TypedefDecl {
            psl: td_loc.clone(),
            name: "intp".into(),
            should_check: false,
        })
        .with_decl(spelled(&a_loc, "a"))
        .with_decl(spelled(&b_loc, "b"));
    let mut pi = engine_with(&[tu]);

    let a_atom = first_atom(&pi, var_at(&pi, &a_loc));
    pi.constraints_mut()
        .add_geq(a_atom, Atom::ARR, true, Reason::new("Pointer is indexed", None));
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &a_loc), PtrKind::Arr);
    assert_eq!(kind_at(&pi, &b_loc), PtrKind::Ptr);
}

// ==============================================================================
// Solver behavior
// ==============================================================================

#[test]
fn wildness_closes_over_equality_chains() {
    let mut pi = engine();
    let cs = pi.constraints_mut();
    let a = cs.mk_var();
    let b = cs.mk_var();
    let c = cs.mk_var();
    cs.add_eq(a, b, true, Reason::new("chain", None));
    cs.add_eq(b, c, true, Reason::new("chain", None));
    cs.add_geq(a, Atom::WILD, true, Reason::new("cast", None));
    pi.solve_constraints().unwrap();

    let cs = pi.constraints();
    for atom in [a, b, c] {
        assert_eq!(cs.assignment(atom), PtrKind::Wild);
    }
}

#[test]
fn directional_constraint_does_not_propagate_backward() {
    let mut pi = engine();
    let cs = pi.constraints_mut();
    let src = cs.mk_var();
    let dst = cs.mk_var();
    // dst ⊒ src: wildness flows src → dst only.
    cs.add_geq(dst, src, true, Reason::new("assign", None));
    cs.add_geq(dst, Atom::WILD, true, Reason::new("cast", None));
    pi.solve_constraints().unwrap();

    assert_eq!(pi.constraints().assignment(dst), PtrKind::Wild);
    assert_eq!(pi.constraints().assignment(src), PtrKind::Ptr);
}

#[test]
fn implication_fires_and_blame_crosses_it() {
    // Two real declarations so root-cause analysis keeps their atoms.
    let p_loc = psl("a.c", 1);
    let q_loc = psl("a.c", 2);
    let tu = TranslationUnit::new("a.c")
        .with_decl(Decl::Var(VarDecl::new(
            "p",
            p_loc.clone(),
            PtrType::pointer("int", 1),
        )))
        .with_decl(Decl::Var(VarDecl::new(
            "q",
            q_loc.clone(),
            PtrType::pointer("int", 1),
        )));
    let mut pi = engine_with(&[tu]);
    let p = first_atom(&pi, var_at(&pi, &p_loc));
    let q = first_atom(&pi, var_at(&pi, &q_loc));

    let premise = crate::GeqBody::new(p, Atom::ARR, true);
    let conclusion = crate::GeqBody::new(q, Atom::WILD, true);
    pi.constraints_mut()
        .add_implies(premise, conclusion, Reason::new("itype propagation", None));

    // Premise not yet entailed: nothing happens.
    pi.solve_constraints().unwrap();
    assert_eq!(pi.constraints().assignment(q), PtrKind::Ptr);

    // Wild `p` entails `p ⊒ ARR`; the conclusion materializes, with the
    // physical edge running from WILD to it.
    pi.constraints_mut()
        .add_geq(p, Atom::WILD, true, Reason::new("cast", None));
    pi.solve_constraints().unwrap();
    assert_eq!(pi.constraints().assignment(q), PtrKind::Wild);
    assert!(pi
        .constraints()
        .checked_graph()
        .successors(Atom::WILD)
        .contains(&q));

    // Blame nonetheless flows from the premise's atom through the logical
    // step.
    let state = pi.compute_interim_constraint_state();
    let (p_key, q_key) = (p.as_var().unwrap(), q.as_var().unwrap());
    assert!(state.rc_map[&q_key].contains(&p_key));
}

#[test]
fn interop_signature_keeps_external_view_when_body_goes_wild() {
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Function(
        FunctionDecl::new(
            "f",
            psl("a.c", 1),
            FnSig::new(
                PtrType::scalar("void"),
                vec![ParamDecl::new(
                    "p",
                    Psl::new("a.c", 1, 14),
                    PtrType::pointer("int", 1),
                )
                .with_itype(PtrType::pointer("int", 1))],
            ),
        )
        .with_body(),
    ));
    let mut pi = engine_with(&[tu]);
    let f = pi.get_func_constraint("f", "a.c", Linkage::External).unwrap();
    let fv = pi.cvar(f).as_function().unwrap();
    let internal = fv.internal_param(0).unwrap();
    let external = fv.external_param(0).unwrap();

    // Body analysis found an unsafe use of the parameter.
    pi.constrain_to_wild(internal, "Unsafe use in body", None);
    run_all(&mut pi);

    assert_eq!(
        pi.constraints().assignment(first_atom(&pi, internal)),
        PtrKind::Wild
    );
    assert_eq!(
        pi.constraints().assignment(first_atom(&pi, external)),
        PtrKind::Ptr
    );
}

#[test]
fn already_checked_input_is_a_fixed_point() {
    // A declaration that already carries its checked kind: nothing changes,
    // and no wild pointers are reported in source.
    let loc = psl("a.c", 2);
    let tu = TranslationUnit::new("a.c").with_decl(Decl::Var(VarDecl::new(
        "p",
        loc.clone(),
        PtrType::pointer("int", 1).with_checked(PtrKind::Ptr),
    )));
    let mut pi = engine_with(&[tu]);
    run_all(&mut pi);

    assert_eq!(kind_at(&pi, &loc), PtrKind::Ptr);
    assert!(pi.constraint_state().in_src_wild_atoms.is_empty());
}

// ==============================================================================
// Expression caches
// ==============================================================================

#[test]
fn expression_caches_are_keyed_by_location_and_castness() {
    let mut pi = engine();
    let loc = psl("a.c", 9);
    let cv = pi.make_pointer_var(&SmolStr::new("e"), &loc, &PtrType::pointer("int", 1));

    pi.store_persistent_constraints(&loc, false, true, [cv]);
    assert!(pi.has_persistent_constraints(&loc, false));
    assert!(!pi.has_persistent_constraints(&loc, true));
    assert_eq!(
        pi.get_persistent_constraints(&loc, false).unwrap().len(),
        1
    );
}

#[test]
fn expressions_inside_macros_are_not_cached() {
    let mut pi = engine();
    let loc = psl("a.c", 9);
    let cv = pi.make_pointer_var(&SmolStr::new("e"), &loc, &PtrType::pointer("int", 1));
    pi.store_persistent_constraints(&loc, false, /* rewritable */ false, [cv]);
    assert!(!pi.has_persistent_constraints(&loc, false));
}
