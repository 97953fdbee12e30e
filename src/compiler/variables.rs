use std::collections::HashMap;

use lasso::{Rodeo, Spur};

use crate::value::Type;

/// A named storage location known to the compiler.
///
/// The entry exists from the moment the name is first assigned to, but it
/// only becomes readable once that assignment has been compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variable {
    name: Spur,
    ty: Option<Type>,
    slot: u8,
}

impl Variable {
    pub fn ty(&self) -> Option<Type> {
        self.ty
    }

    pub fn is_initialized(&self) -> bool {
        self.ty.is_some()
    }

    pub fn slot(&self) -> u8 {
        self.slot
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot assign '{found}' value to variable of type '{expected}'")]
pub struct TypeConflict {
    pub expected: Type,
    pub found: Type,
}

/// Maps variable names to their type and slot for one compilation.
#[derive(Debug, Default)]
pub struct VariableTable {
    names: Rodeo,
    variables: HashMap<Spur, Variable>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: impl AsRef<str>) -> Option<&Variable> {
        let key = self.names.get(name.as_ref())?;
        self.variables.get(&key)
    }

    /// Creates an uninitialized entry, replacing any entry that might already
    /// exist under the same name.
    pub fn declare(&mut self, name: impl AsRef<str>, slot: u8) -> &Variable {
        let key = self.names.get_or_intern(name.as_ref());
        self.variables.insert(
            key,
            Variable {
                name: key,
                ty: None,
                slot,
            },
        );
        &self.variables[&key]
    }

    /// Records that `name` now holds a value of type `ty`.
    ///
    /// Fails if the variable already holds a value of another type.
    pub fn assign(&mut self, name: impl AsRef<str>, ty: Type) -> Result<&Variable, TypeConflict> {
        let variable = self
            .names
            .get(name.as_ref())
            .and_then(|key| self.variables.get_mut(&key));
        // undeclared names cannot be assigned to
        let Some(variable) = variable else {
            unreachable!("assignment to undeclared variable `{}`", name.as_ref())
        };
        match variable.ty {
            Some(expected) if expected != ty => Err(TypeConflict { expected, found: ty }),
            _ => {
                variable.ty = Some(ty);
                Ok(&*variable)
            }
        }
    }

    pub fn name(&self, variable: &Variable) -> &str {
        self.names.resolve(&variable.name)
    }

    /// All variables in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variable)> {
        let mut variables = self.variables.values().collect::<Vec<_>>();
        variables.sort_by_key(|v| v.slot);
        variables.into_iter().map(|v| (self.name(v), v))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{TypeConflict, VariableTable};
    use crate::value::Type;

    use assert2::{check, let_assert};

    #[test]
    fn declared_variables_start_uninitialized() {
        let mut table = VariableTable::new();
        let variable = *table.declare("N", 3);
        check!(!variable.is_initialized());
        check!(variable.slot() == 3);
        check!(table.get("N") == Some(&variable));
        check!(table.get("n").is_none());
    }

    #[test]
    fn first_assignment_fixes_the_type() {
        let mut table = VariableTable::new();
        table.declare("FLAG", 0);
        let_assert!(Ok(variable) = table.assign("FLAG", Type::Boolean));
        check!(variable.ty() == Some(Type::Boolean));
        let_assert!(Ok(_) = table.assign("FLAG", Type::Boolean));
        check!(
            table.assign("FLAG", Type::Number)
                == Err(TypeConflict {
                    expected: Type::Boolean,
                    found: Type::Number
                })
        );
        // a failed assignment leaves the type alone
        check!(table.get("FLAG").and_then(|v| v.ty()) == Some(Type::Boolean));
    }

    #[test]
    fn iteration_is_in_slot_order() {
        let mut table = VariableTable::new();
        table.declare("B", 1);
        table.declare("OUTPUT", 0);
        table.declare("A", 2);
        let names = table.iter().map(|(name, _)| name).collect::<Vec<_>>();
        check!(names == ["OUTPUT", "B", "A"]);
        check!(table.len() == 3);
    }

    #[test]
    fn conflict_message() {
        let conflict = TypeConflict {
            expected: Type::Number,
            found: Type::Boolean,
        };
        check!(conflict.to_string() == "cannot assign 'boolean' value to variable of type 'number'");
    }
}
