//! Textual dumps of trees, blocks and whole methods.
//!
//! The format is meant for `trace!` output and test failure messages:
//!
//! ```text
//! BB01 [weight 1.00] -> cond(BB03, BB02)
//!   STMT00 (IL 0x0000)
//!     [N004] STORE_LCL_VAR int V00
//!     [N003]   ADD int
//!     [N001]     LCL_VAR int V00
//!     [N002]     CNS_INT int 1
//! ```

use std::fmt::Write;

use super::block::{BlockId, JumpKind};
use super::body::MethodBody;
use super::node::{NodeId, NodeKind};
use super::stmt::StmtId;

impl MethodBody {
    /// Dump a tree, one node per line, children indented under parents.
    pub fn dump_tree(&self, root: NodeId) -> String {
        let mut out = String::new();
        self.dump_node(&mut out, root, 0);
        out
    }

    fn dump_node(&self, out: &mut String, id: NodeId, depth: usize) {
        let node = &self.nodes[id];
        let _ = write!(
            out,
            "[{}] {:indent$}{} {}",
            id,
            "",
            node.kind.oper_name(),
            node.ty,
            indent = depth * 2
        );
        match &node.kind {
            NodeKind::IntCon { value, handle } => {
                let _ = write!(out, " {}", value);
                if let Some(handle) = handle {
                    let _ = write!(out, " {:?}", handle);
                }
            }
            NodeKind::DblCon { value } => {
                let _ = write!(out, " {}", value);
            }
            NodeKind::VecCon { bytes } => {
                let _ = write!(out, " <{} bytes>", bytes.len());
            }
            NodeKind::LclVar { lcl } | NodeKind::StoreLclVar { lcl, .. } => {
                let _ = write!(out, " {}", lcl);
            }
            NodeKind::LclFld { lcl, offset, .. }
            | NodeKind::StoreLclFld { lcl, offset, .. }
            | NodeKind::LclAddr { lcl, offset } => {
                let _ = write!(out, " {} [+{}]", lcl, offset);
            }
            NodeKind::FieldAddr { offset, .. } => {
                let _ = write!(out, " [+{}]", offset);
            }
            NodeKind::Call(call) => {
                let _ = write!(out, " {}", call.target);
                if let Some(candidate) = call.candidate {
                    let _ = write!(out, " (candidate {:?})", candidate);
                }
            }
            _ => {}
        }
        if !node.flags.is_empty() {
            let _ = write!(out, " {:?}", node.flags);
        }
        out.push('\n');
        for op in node.kind.operands() {
            self.dump_node(out, op, depth + 1);
        }
    }

    /// Dump a statement.
    pub fn dump_stmt(&self, stmt: StmtId) -> String {
        let s = &self.stmts[stmt];
        let mut out = match s.il_offset {
            Some(il) => format!("{} (IL 0x{:04x})\n", stmt, il),
            None => format!("{} (IL ???)\n", stmt),
        };
        out.push_str(&self.dump_tree(s.root));
        out
    }

    /// Dump a block header and its statements.
    pub fn dump_block(&self, block: BlockId) -> String {
        let b = &self.blocks[block];
        let mut out = format!("BB{:02} [weight {}]", b.num, b.weight);
        let num = |id: BlockId| self.blocks[id].num;
        let _ = match &b.jump {
            JumpKind::Return => write!(out, " -> return"),
            JumpKind::Throw => write!(out, " -> throw"),
            JumpKind::Always(t) => write!(out, " -> BB{:02}", num(*t)),
            JumpKind::Cond {
                taken,
                not_taken,
                taken_likelihood,
            } => write!(
                out,
                " -> cond(BB{:02} {:.2}, BB{:02})",
                num(*taken),
                taken_likelihood,
                num(*not_taken)
            ),
            JumpKind::Switch(targets) => {
                let names: Vec<String> = targets.iter().map(|t| format!("BB{:02}", num(*t))).collect();
                write!(out, " -> switch({})", names.join(", "))
            }
        };
        if let Some(region) = b.eh_region {
            let _ = write!(out, " {}", region);
        }
        if b.is_run_rarely() {
            out.push_str(" rare");
        }
        out.push('\n');
        for stmt in &b.statements {
            for line in self.dump_stmt(*stmt).lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
        out
    }

    /// Dump every block in layout order.
    pub fn dump(&self) -> String {
        self.layout.iter().map(|b| self.dump_block(*b)).collect()
    }
}
