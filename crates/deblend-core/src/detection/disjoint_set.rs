/// Array-backed disjoint-set forest over `u32` labels.
///
/// `union` only links roots; paths are flattened on read in [`find`], so a
/// scan that unions many times and reads once pays O(1) amortized per label.
///
/// [`find`]: DisjointSet::find
#[derive(Clone, Debug, Default)]
pub struct DisjointSet {
    parent: Vec<u32>,
}

impl DisjointSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            parent: Vec::with_capacity(n),
        }
    }

    pub fn len(&self) -> usize {
        self.parent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent.is_empty()
    }

    /// Create a new singleton set and return its label.
    pub fn make_set(&mut self) -> u32 {
        let label = self.parent.len() as u32;
        self.parent.push(label);
        label
    }

    /// Root of `x`, compressing the path behind it.
    pub fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cur = x;
        while self.parent[cur as usize] != root {
            let next = self.parent[cur as usize];
            self.parent[cur as usize] = root;
            cur = next;
        }
        root
    }

    /// Root of `x` without modifying the forest.
    pub fn find_const(&self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            x = self.parent[x as usize];
        }
        x
    }

    /// Merge the sets holding `a` and `b`. The smaller root label survives so
    /// labels stay in discovery order. Returns the surviving root.
    pub fn union(&mut self, a: u32, b: u32) -> u32 {
        let ra = self.find_const(a);
        let rb = self.find_const(b);
        if ra == rb {
            return ra;
        }
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[big as usize] = small;
        small
    }

    /// Point every label directly at its root.
    pub fn flatten(&mut self) {
        for i in 0..self.parent.len() {
            let root = self.find(i as u32);
            self.parent[i] = root;
        }
    }
}
