/// Actor implementation of the capacity planner. The actor serializes pool mutations, and
/// adds capacity to pools as reservations get paid.
pub mod planner;
