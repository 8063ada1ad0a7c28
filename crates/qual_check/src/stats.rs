//! Reporting: per-file constraint statistics, the constraints document, and
//! the wild-pointer reports. The JSON shapes here are stable; downstream
//! tooling parses them.

use std::collections::BTreeMap;
use std::io::{self, Write};

use qual_ty::PtrKind;
use serde_json::{json, Value};
use smol_str::SmolStr;

use crate::cvar::{CVarId, ConstraintVar};
use crate::store::Constraint;
use crate::ProgramInfo;

#[derive(Debug, Default, Clone, Copy)]
struct FileTally {
    constraints: usize,
    ptr: usize,
    ntarr: usize,
    arr: usize,
    wild: usize,
}

impl FileTally {
    fn add(&mut self, kind: PtrKind) {
        self.constraints += 1;
        match kind {
            PtrKind::Ptr => self.ptr += 1,
            PtrKind::NtArr => self.ntarr += 1,
            PtrKind::Arr => self.arr += 1,
            PtrKind::Wild => self.wild += 1,
        }
    }
}

impl ProgramInfo {
    fn tally_files(&self, files: &[SmolStr]) -> BTreeMap<SmolStr, FileTally> {
        let mut tallies: BTreeMap<SmolStr, FileTally> = BTreeMap::new();
        for (psl, &id) in &self.variables {
            if !files.iter().any(|f| f == psl.file_name()) {
                continue;
            }
            if !self.cvars[id].is_valid_decl() {
                continue;
            }
            let tally = tallies.entry(psl.file.clone()).or_default();
            for atom in self.atoms_of(id) {
                tally.add(self.cs.assignment(atom));
            }
        }
        tallies
    }

    /// Per-file statistics, either as `file|#constraints|#ptr|#ntarr|#arr|#wild`
    /// lines plus a `Summary` block, or as the stats JSON document.
    pub fn print_stats(
        &self,
        files: &[SmolStr],
        out: &mut impl Write,
        only_summary: bool,
        json_format: bool,
    ) -> io::Result<()> {
        let tallies = self.tally_files(files);
        let mut total = FileTally::default();
        for t in tallies.values() {
            total.constraints += t.constraints;
            total.ptr += t.ptr;
            total.ntarr += t.ntarr;
            total.arr += t.arr;
            total.wild += t.wild;
        }

        if json_format {
            let mut constraint_stats = serde_json::Map::new();
            if !only_summary {
                let individual: Vec<Value> = tallies
                    .iter()
                    .map(|(file, t)| {
                        let stats = json!({
                            "constraints": t.constraints,
                            "ptr": t.ptr,
                            "ntarr": t.ntarr,
                            "arr": t.arr,
                            "wild": t.wild,
                        });
                        let mut entry = serde_json::Map::new();
                        entry.insert(file.to_string(), stats);
                        Value::Object(entry)
                    })
                    .collect();
                constraint_stats.insert("Individual".into(), Value::Array(individual));
            }
            constraint_stats.insert(
                "Summary".into(),
                json!({
                    "TotalConstraints": total.constraints,
                    "TotalPtrs": total.ptr,
                    "TotalNTArr": total.ntarr,
                    "TotalArr": total.arr,
                    "TotalWild": total.wild,
                }),
            );
            let doc = json!({ "Stats": { "ConstraintStats": constraint_stats } });
            writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)?;
            return Ok(());
        }

        if !only_summary {
            writeln!(out, "Enable itype propagation:{}", self.opts.enable_itype_prop as u8)?;
            writeln!(
                out,
                "Sound handling of var args functions:{}",
                self.opts.handle_varargs as u8
            )?;
            writeln!(out, "file|#constraints|#ptr|#ntarr|#arr|#wild")?;
            for (file, t) in &tallies {
                writeln!(
                    out,
                    "{file}|{}|{}|{}|{}|{}",
                    t.constraints, t.ptr, t.ntarr, t.arr, t.wild
                )?;
            }
        }
        writeln!(out, "Summary")?;
        writeln!(out, "TotalConstraints|TotalPtrs|TotalNTArr|TotalArr|TotalWild")?;
        writeln!(
            out,
            "{}|{}|{}|{}|{}",
            total.constraints, total.ptr, total.ntarr, total.arr, total.wild
        )?;
        Ok(())
    }

    /// The constraints document: store setup, constraint variables by
    /// location, and the function maps.
    pub fn dump_json(&self, out: &mut impl Write) -> io::Result<()> {
        let constraints: Vec<Value> = self
            .cs
            .constraints()
            .iter()
            .map(|c| match c {
                Constraint::Geq(body) => {
                    let reason = self.cs.reason_for(body);
                    json!({"Geq": {
                        "lhs": body.lhs.to_string(),
                        "rhs": body.rhs.to_string(),
                        "checked": body.checked,
                        "reason": reason.map(|r| r.text.as_str()).unwrap_or(""),
                    }})
                }
                Constraint::Implies {
                    premise,
                    conclusion,
                } => json!({"Implies": {
                    "premise": {
                        "lhs": premise.lhs.to_string(),
                        "rhs": premise.rhs.to_string(),
                    },
                    "conclusion": {
                        "lhs": conclusion.lhs.to_string(),
                        "rhs": conclusion.rhs.to_string(),
                    },
                }}),
            })
            .collect();

        let variables: Vec<Value> = self
            .variables
            .iter()
            .map(|(psl, &id)| {
                json!({
                    "line": psl.to_string(),
                    "Variables": [self.cvar_json(id)],
                })
            })
            .collect();

        let externals: Vec<Value> = self
            .external_function_fv_cons
            .iter()
            .map(|(name, &id)| {
                json!({
                    "FuncName": name.as_str(),
                    "Constraints": [self.cvar_json(id)],
                })
            })
            .collect();

        let statics: Vec<Value> = {
            let mut by_name: BTreeMap<&SmolStr, Vec<Value>> = BTreeMap::new();
            for (file, funcs) in &self.static_function_fv_cons {
                for (name, &id) in funcs {
                    by_name.entry(name).or_default().push(json!({
                        "FileName": file.as_str(),
                        "FVConstraints": [self.cvar_json(id)],
                    }));
                }
            }
            by_name
                .into_iter()
                .map(|(name, entries)| {
                    json!({
                        "FuncName": name.as_str(),
                        "Constraints": entries,
                    })
                })
                .collect()
        };

        let doc = json!({
            "Setup": { "Constraints": constraints },
            "ConstraintVariables": variables,
            "ExternalFunctionDefinitions": externals,
            "StaticFunctionDefinitions": statics,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&doc)?)
    }

    fn cvar_json(&self, id: CVarId) -> Value {
        match &self.cvars[id] {
            ConstraintVar::Pointer(p) => {
                let atoms: Vec<String> = p.atoms().iter().map(|a| a.to_string()).collect();
                let mut obj = json!({ "name": self.cvars[id].name().as_str(), "atoms": atoms });
                if let Some(fv) = p.fv() {
                    obj["function"] = self.cvar_json(fv);
                }
                obj
            }
            ConstraintVar::Function(f) => {
                let params: Vec<Value> = (0..f.num_params())
                    .map(|i| {
                        json!({
                            "external": self.cvar_json(f.external_param(i).expect("in range")),
                            "internal": self.cvar_json(f.internal_param(i).expect("in range")),
                        })
                    })
                    .collect();
                json!({
                    "name": f.name().as_str(),
                    "return": {
                        "external": self.cvar_json(f.external_return()),
                        "internal": self.cvar_json(f.internal_return()),
                    },
                    "params": params,
                })
            }
        }
    }

    /// Wild pointers grouped by the reason that forced them, largest group
    /// first.
    pub fn dump_wild_ptr_stats(&self, out: &mut impl Write) -> io::Result<()> {
        let mut by_reason: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for (key, info) in &self.cstate.root_wild_atoms_with_reason {
            by_reason.entry(info.reason.as_str()).or_default().push(json!({
                "atom": format!("q_{}", key.0),
                "at": info.loc.as_ref().map(|p| p.to_string()),
                "affected": self
                    .cstate
                    .src_w_map
                    .get(key)
                    .map_or(0, |s| s.len()),
            }));
        }
        let mut groups: Vec<Value> = by_reason
            .into_iter()
            .map(|(reason, atoms)| {
                json!({ "Reason": reason, "Count": atoms.len(), "Atoms": atoms })
            })
            .collect();
        groups.sort_by_key(|g| std::cmp::Reverse(g["Count"].as_u64()));
        writeln!(out, "{}", serde_json::to_string_pretty(&Value::Array(groups))?)
    }

    /// Per-pointer report: every affected atom with the direct causes it is
    /// blamed on.
    pub fn dump_per_ptr_stats(&self, out: &mut impl Write) -> io::Result<()> {
        let entries: Vec<Value> = self
            .cstate
            .rc_map
            .iter()
            .map(|(key, causes)| {
                json!({
                    "atom": format!("q_{}", key.0),
                    "at": self.cstate.atom_source_map.get(key).map(|p| p.to_string()),
                    "causes": causes
                        .iter()
                        .map(|c| format!("q_{}", c.0))
                        .collect::<Vec<_>>(),
                })
            })
            .collect();
        writeln!(
            out,
            "{}",
            serde_json::to_string_pretty(&Value::Array(entries))?
        )
    }

    /// The solved qualifier for each level of each valid declaration in a
    /// writable file — what the rewriter consumes. Without `all_types`,
    /// array kinds fall back to the single-object pointer the rewriter can
    /// always produce.
    pub fn render_solution(&self, out: &mut impl Write) -> io::Result<()> {
        for (psl, &id) in &self.variables {
            if !self.cvars[id].is_valid_decl() || !self.can_write(psl.file_name()) {
                continue;
            }
            let kinds: Vec<String> = self
                .atoms_of(id)
                .into_iter()
                .map(|a| {
                    let mut kind = self.cs.assignment(a);
                    if !self.opts.all_types && matches!(kind, PtrKind::Arr | PtrKind::NtArr) {
                        kind = PtrKind::Ptr;
                    }
                    kind.to_string()
                })
                .collect();
            if kinds.is_empty() {
                continue;
            }
            writeln!(
                out,
                "{psl}|{}|{}",
                self.cvars[id].name(),
                kinds.join(",")
            )?;
        }
        Ok(())
    }
}
