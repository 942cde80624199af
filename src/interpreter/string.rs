//! String handlers and the `print` family.

use super::Vm;
use crate::error::{RuntimeError, TrapKind};
use crate::state::ExecuteState;
use crate::value::{ObjectBody, Value};

type OpResult = Result<ExecuteState, RuntimeError>;

impl Vm {
    /// Allocates the concatenation of two strings. Both operands are
    /// held on the temporary-root stack across the allocation so a
    /// collection at the next safe point cannot reclaim them while the
    /// result is still in flight.
    pub(crate) fn op_concat(&mut self) -> OpResult {
        let (dst, a, b) = self.fetch_rrr()?;

        let left = self.registers.read(a).as_obj()?;
        let right = self.registers.read(b).as_obj()?;

        self.heap.push_root(left);
        self.heap.push_root(right);

        let result = self.concat_strings(left, right);

        self.heap.pop_root();
        self.heap.pop_root();

        let id = result?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    fn concat_strings(
        &mut self,
        left: crate::value::ObjId,
        right: crate::value::ObjId,
    ) -> Result<crate::value::ObjId, RuntimeError> {
        let (x, y) = match (self.heap.body(left), self.heap.body(right)) {
            (ObjectBody::Str { bytes: x, .. }, ObjectBody::Str { bytes: y, .. }) => {
                (std::rc::Rc::clone(x), std::rc::Rc::clone(y))
            }
            _ => return Err(TrapKind::TypeMismatch.into()),
        };

        let mut joined = String::with_capacity(x.len() + y.len());
        joined.push_str(&x);
        joined.push_str(&y);

        self.heap.alloc_string(joined).map_err(RuntimeError::Halt)
    }

    pub(crate) fn op_to_string(&mut self) -> OpResult {
        let (dst, src) = self.fetch_rr()?;

        let value = self.registers.read(src);
        if let Value::Obj(id) = value {
            self.heap.push_root(id);
        }

        let text = self.heap.format_value(value);
        let result = self.heap.alloc_string(text);

        if matches!(value, Value::Obj(_)) {
            self.heap.pop_root();
        }

        let id = result.map_err(RuntimeError::Halt)?;
        self.registers.write(dst, Value::Obj(id));

        Ok(ExecuteState::Proceed)
    }

    /* PRINTING */

    pub(crate) fn op_print(&mut self) -> OpResult {
        let reg = self.fetch_u8()?;

        let value = self.registers.read(reg);
        let mut text = self.heap.format_value(value);
        text.push('\n');
        self.output.write_str(&text);

        Ok(ExecuteState::Proceed)
    }

    pub(crate) fn op_print_multi(&mut self) -> OpResult {
        let (first, count, newline) = self.fetch_rrr()?;

        let mut text = String::new();
        for offset in 0..count {
            if offset > 0 {
                text.push(' ');
            }
            let value = self.registers.read(first.wrapping_add(offset));
            text.push_str(&self.heap.format_value(value));
        }
        if newline != 0 {
            text.push('\n');
        }

        self.output.write_str(&text);

        Ok(ExecuteState::Proceed)
    }
}
