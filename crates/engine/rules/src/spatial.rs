//! Spatial queries on top of the host's sector index

use crate::filter::{CountRange, FilterContext, ObjectFilter};
use crate::host::{ObjectStore, SpatialIndex};
use crate::world::{distance_xz, ObjectId, WorldObject};
use glam::{IVec2, Vec3};
use std::collections::HashSet;

/// Sector coordinates of a position. Sector `(0, 0)` is centred on the origin.
pub fn sector_of(position: Vec3, size: f32) -> IVec2 {
    let half = size / 2.0;
    IVec2::new(
        ((position.x + half) / size).floor() as i32,
        ((position.z + half) / size).floor() as i32,
    )
}

/// Buckets covering every sector a circle touches, each bucket listed once.
/// Off-grid sectors are served from the overflow buckets.
pub fn candidates_near<W: SpatialIndex + ?Sized>(index: &W, position: Vec3, radius: f32) -> Vec<&[ObjectId]> {
    let size = index.sector_size();
    let min = sector_of(position - Vec3::new(radius, 0.0, radius), size);
    let max = sector_of(position + Vec3::new(radius, 0.0, radius), size);

    let mut seen = HashSet::new();
    let mut buckets = Vec::new();
    for x in min.x..=max.x {
        for y in min.y..=max.y {
            let sector = IVec2::new(x, y);
            match index.sector_index(sector) {
                Some(i) => {
                    if seen.insert(i) {
                        buckets.push(index.sector_objects(i));
                    }
                }
                None => {
                    if let Some(outside) = index.outside_objects(sector) {
                        buckets.push(outside);
                    }
                }
            }
        }
    }
    buckets
}

fn max_radius(filters: &[ObjectFilter]) -> f32 {
    filters.iter().map(|f| f.max_distance).fold(0.0, f32::max)
}

/// Iterate live candidate records within reach of any filter
fn candidates<'w, W>(world: &'w W, filters: &[ObjectFilter], position: Vec3, exclude: Option<ObjectId>) -> impl Iterator<Item = &'w WorldObject>
where
    W: SpatialIndex + ObjectStore + ?Sized,
{
    candidates_near(world, position, max_radius(filters))
        .into_iter()
        .flat_map(|bucket| bucket.iter().copied())
        .filter(move |id| Some(*id) != exclude)
        .filter_map(move |id| world.get(id))
}

/// Records matching any filter. A positive `limit` keeps only the closest ones.
pub fn nearby<W>(
    world: &W,
    filters: &[ObjectFilter],
    position: Vec3,
    limit: i32,
    exclude: Option<ObjectId>,
    ctx: &FilterContext<'_>,
) -> Vec<ObjectId>
where
    W: SpatialIndex + ObjectStore + ?Sized,
{
    let mut found: Vec<&WorldObject> = candidates(world, filters, position, exclude)
        .filter(|o| filters.iter().any(|f| f.matches(o, position, ctx)))
        .collect();
    if limit > 0 {
        found.sort_by(|a, b| {
            distance_xz(position, a.position).total_cmp(&distance_xz(position, b.position))
        });
        found.truncate(limit as usize);
    }
    found.into_iter().map(|o| o.id).collect()
}

/// Whether every filter is satisfied by at least one record
pub fn has_all<W>(
    world: &W,
    filters: &[ObjectFilter],
    position: Vec3,
    exclude: Option<ObjectId>,
    ctx: &FilterContext<'_>,
) -> bool
where
    W: SpatialIndex + ObjectStore + ?Sized,
{
    let records: Vec<&WorldObject> = candidates(world, filters, position, exclude).collect();
    filters
        .iter()
        .all(|f| records.iter().any(|o| f.matches(o, position, ctx)))
}

/// Whether the weighted number of matches falls inside `range`.
///
/// Each record counts once, with the weight of the first filter it matches.
/// With an explicit maximum the count fails as soon as it is exceeded;
/// without one it succeeds as soon as the minimum is reached.
pub fn count_in_range<W>(
    world: &W,
    filters: &[ObjectFilter],
    range: CountRange,
    position: Vec3,
    exclude: Option<ObjectId>,
    ctx: &FilterContext<'_>,
) -> bool
where
    W: SpatialIndex + ObjectStore + ?Sized,
{
    let mut count = 0;
    for record in candidates(world, filters, position, exclude) {
        let Some(filter) = filters.iter().find(|f| f.matches(record, position, ctx)) else {
            continue;
        };
        count += filter.weight;
        match range.max {
            Some(max) if count > max => return false,
            None if count >= range.min => return true,
            _ => {}
        }
    }
    range.contains(count)
}

/// Required-objects check. No filters always passes.
pub fn has_nearby<W>(
    world: &W,
    filters: &[ObjectFilter],
    limit: Option<CountRange>,
    position: Vec3,
    exclude: Option<ObjectId>,
    ctx: &FilterContext<'_>,
) -> bool
where
    W: SpatialIndex + ObjectStore + ?Sized,
{
    if filters.is_empty() {
        return true;
    }
    match limit {
        Some(range) => count_in_range(world, filters, range, position, exclude, ctx),
        None => has_all(world, filters, position, exclude, ctx),
    }
}

/// Banned-objects check. No filters always passes.
pub fn has_not_nearby<W>(
    world: &W,
    filters: &[ObjectFilter],
    limit: Option<CountRange>,
    position: Vec3,
    exclude: Option<ObjectId>,
    ctx: &FilterContext<'_>,
) -> bool
where
    W: SpatialIndex + ObjectStore + ?Sized,
{
    if filters.is_empty() {
        return true;
    }
    !has_nearby(world, filters, limit, position, exclude, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PrefabMatcher;
    use crate::memory::MemoryWorld;
    use crate::template::{Parameters, Pars};
    use crate::PrefabHash;

    fn boar_filter(max: f32) -> ObjectFilter {
        ObjectFilter::new(PrefabMatcher::Exact(PrefabHash::of("Boar")), max)
    }

    #[test]
    fn test_sector_of() {
        assert_eq!(sector_of(Vec3::new(0.0, 0.0, 0.0), 64.0), IVec2::new(0, 0));
        assert_eq!(sector_of(Vec3::new(31.9, 0.0, -31.9), 64.0), IVec2::new(0, 0));
        assert_eq!(sector_of(Vec3::new(32.0, 0.0, -32.1), 64.0), IVec2::new(1, -1));
    }

    #[test]
    fn test_candidates_cover_radius() {
        let mut world = MemoryWorld::new(64.0, 4);
        let near = world.spawn("Boar", Vec3::new(70.0, 0.0, 0.0));
        let far = world.spawn("Boar", Vec3::new(400.0, 0.0, 0.0));
        let ids: Vec<ObjectId> = candidates_near(&world, Vec3::ZERO, 80.0)
            .into_iter()
            .flat_map(|b| b.iter().copied())
            .collect();
        assert!(ids.contains(&near));
        assert!(!ids.contains(&far));
    }

    #[test]
    fn test_overflow_buckets() {
        let mut world = MemoryWorld::new(64.0, 1);
        let outside = world.spawn("Boar", Vec3::new(1000.0, 0.0, 0.0));
        let ids: Vec<ObjectId> = candidates_near(&world, Vec3::new(1000.0, 0.0, 0.0), 10.0)
            .into_iter()
            .flat_map(|b| b.iter().copied())
            .collect();
        assert_eq!(ids, vec![outside]);
    }

    #[test]
    fn test_wide_radius_lists_each_object_once() {
        let mut world = MemoryWorld::new(64.0, 2);
        let mut expected = Vec::new();
        for x in -2..=2 {
            for z in -2..=2 {
                expected.push(world.spawn("Boar", Vec3::new(x as f32 * 64.0, 0.0, z as f32 * 64.0)));
            }
        }
        expected.push(world.spawn("Wolf", Vec3::new(300.0, 0.0, 0.0)));

        let buckets = candidates_near(&world, Vec3::new(120.0, 0.0, 120.0), 600.0);
        assert_eq!(buckets.len(), 26);
        let mut ids: Vec<ObjectId> = buckets.into_iter().flat_map(|b| b.iter().copied()).collect();
        ids.sort();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_nearby_limit_keeps_closest() {
        let mut world = MemoryWorld::new(64.0, 4);
        let a = world.spawn("Boar", Vec3::new(30.0, 0.0, 0.0));
        let b = world.spawn("Boar", Vec3::new(5.0, 0.0, 0.0));
        let c = world.spawn("Boar", Vec3::new(15.0, 0.0, 0.0));
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        let filters = [boar_filter(50.0)];

        assert_eq!(nearby(&world, &filters, Vec3::ZERO, 2, None, &ctx), vec![b, c]);
        let mut all = nearby(&world, &filters, Vec3::ZERO, 0, None, &ctx);
        all.sort();
        assert_eq!(all, vec![a, b, c]);
    }

    #[test]
    fn test_has_all_excludes_self() {
        let mut world = MemoryWorld::new(64.0, 4);
        let me = world.spawn("Boar", Vec3::ZERO);
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        let filters = [boar_filter(10.0)];
        assert!(!has_all(&world, &filters, Vec3::ZERO, Some(me), &ctx));
        assert!(has_all(&world, &filters, Vec3::ZERO, None, &ctx));
    }

    #[test]
    fn test_weighted_counts() {
        let mut world = MemoryWorld::new(64.0, 4);
        for i in 0..3 {
            world.spawn("Boar", Vec3::new(i as f32, 0.0, 0.0));
        }
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        let weighted = [boar_filter(10.0).with_weight(2)];

        // 3 records of weight 2 count as 6
        assert!(count_in_range(&world, &weighted, CountRange::new(6, Some(6)), Vec3::ZERO, None, &ctx));
        assert!(!count_in_range(&world, &weighted, CountRange::new(0, Some(5)), Vec3::ZERO, None, &ctx));
        assert!(count_in_range(&world, &weighted, CountRange::new(4, None), Vec3::ZERO, None, &ctx));
        assert!(!count_in_range(&world, &weighted, CountRange::new(7, None), Vec3::ZERO, None, &ctx));
    }

    #[test]
    fn test_banned_is_negation() {
        let mut world = MemoryWorld::new(64.0, 4);
        world.spawn("Boar", Vec3::new(2.0, 0.0, 0.0));
        let pars = Parameters::new();
        let ctx = FilterContext::new(Pars::new(&pars), &world, &world);
        let filters = [boar_filter(10.0)];
        assert!(has_nearby(&world, &filters, None, Vec3::ZERO, None, &ctx));
        assert!(!has_not_nearby(&world, &filters, None, Vec3::ZERO, None, &ctx));
        assert!(has_not_nearby(&world, &[], None, Vec3::ZERO, None, &ctx));
        assert!(has_nearby(&world, &[], None, Vec3::ZERO, None, &ctx));
    }
}
