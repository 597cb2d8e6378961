use crate::value::Value;
use smallvec::SmallVec;

/// The clause a binding belongs to.
///
/// Bindings are kept per clause so that a dialect may reorder clauses while
/// assembling the SQL and still emit bindings in placeholder order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clause {
    Select,
    From,
    Join,
    Where,
    Group,
    Having,
    Order,
}

impl Clause {
    /// Lexical order of the clauses in a plain `SELECT` statement.
    pub const ALL: [Clause; 7] = [
        Clause::Select,
        Clause::From,
        Clause::Join,
        Clause::Where,
        Clause::Group,
        Clause::Having,
        Clause::Order,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

/// Per-clause binding lists of a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    lists: [SmallVec<[Value; 4]>; 7],
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Clause, value: Value) {
        self.lists[clause.index()].push(value);
    }

    pub fn extend<I>(&mut self, clause: Clause, values: I)
    where
        I: IntoIterator<Item = Value>,
    {
        self.lists[clause.index()].extend(values);
    }

    pub fn get(&self, clause: Clause) -> &[Value] {
        &self.lists[clause.index()]
    }

    pub fn clear(&mut self, clause: Clause) {
        self.lists[clause.index()].clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lists.iter().all(|list| list.is_empty())
    }

    /// Appends the bindings of `clauses` to `out`, in the given order.
    pub fn collect_into(&self, clauses: &[Clause], out: &mut Vec<Value>) {
        for clause in clauses {
            out.extend(self.get(*clause).iter().cloned());
        }
    }

    /// All bindings in standard clause order.
    pub fn flatten(&self) -> Vec<Value> {
        let mut out = Vec::with_capacity(self.lists.iter().map(|l| l.len()).sum());
        self.collect_into(&Clause::ALL, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_follows_clause_order_not_insertion_order() {
        let mut b = Bindings::new();
        b.push(Clause::Order, Value::Int(7));
        b.push(Clause::Where, Value::Int(2));
        b.push(Clause::Select, Value::Int(1));
        b.push(Clause::Having, Value::Int(5));
        assert_eq!(
            b.flatten(),
            vec![Value::Int(1), Value::Int(2), Value::Int(5), Value::Int(7)]
        );
    }

    #[test]
    fn clear_only_touches_one_clause() {
        let mut b = Bindings::new();
        b.push(Clause::Where, Value::Int(1));
        b.push(Clause::Order, Value::Int(2));
        b.clear(Clause::Order);
        assert_eq!(b.get(Clause::Where), &[Value::Int(1)]);
        assert!(b.get(Clause::Order).is_empty());
        assert!(!b.is_empty());
    }
}
