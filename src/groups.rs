//! Reconciles points-group prototypes read from the extensions with the
//! free waypoints actually present.

use crate::extensions::HasExtensions;
use crate::gpx_types::{PointsGroup, WptPt};

/// Builds the insertion-ordered group list: prototypes first, then one group
/// per category not covered by a prototype. Every waypoint lands in the group
/// named after its category (empty name when it has none).
pub fn merge_points_groups(prototypes: Vec<PointsGroup>, points: &[WptPt]) -> Vec<PointsGroup> {
    let mut groups: Vec<PointsGroup> = Vec::with_capacity(prototypes.len());
    for mut prototype in prototypes {
        prototype.points.clear();
        match groups.iter_mut().find(|g| g.name == prototype.name) {
            Some(existing) => *existing = prototype,
            None => groups.push(prototype),
        }
    }
    for (index, point) in points.iter().enumerate() {
        let name = point.category.as_deref().unwrap_or_default();
        let group = match groups.iter().position(|g| g.name == name) {
            Some(pos) => &mut groups[pos],
            None => {
                groups.push(PointsGroup::from_point(point));
                let last = groups.len() - 1;
                &mut groups[last]
            }
        };
        adopt_appearance(group, point);
        group.points.push(index);
    }
    groups
}

fn adopt_appearance(group: &mut PointsGroup, point: &WptPt) {
    if group.color.is_none() {
        group.color = point.color();
    }
    if group.icon_name.is_none() {
        group.icon_name = point.icon_name().map(str::to_string);
    }
    if group.background_type.is_none() {
        group.background_type = point.background_type().map(str::to_string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wpt(category: Option<&str>) -> WptPt {
        let mut p = WptPt::new(0.0, 0.0);
        p.category = category.map(str::to_string);
        p
    }

    #[test]
    fn test_prototypes_keep_their_order() {
        let groups = merge_points_groups(
            vec![PointsGroup::new("B"), PointsGroup::new("A")],
            &[wpt(Some("A")), wpt(None), wpt(Some("B"))],
        );
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A", ""]);
        assert_eq!(groups[0].points, vec![2]);
        assert_eq!(groups[1].points, vec![0]);
        assert_eq!(groups[2].points, vec![1]);
    }

    #[test]
    fn test_missing_group_is_seeded_from_point() {
        let mut p = wpt(Some("Cafe"));
        p.set_icon_name("cafe");
        p.set_color(0xFFFF_0000);
        let groups = merge_points_groups(Vec::new(), &[p]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].icon_name.as_deref(), Some("cafe"));
        assert_eq!(groups[0].color, Some(0xFFFF_0000));
    }

    #[test]
    fn test_group_adopts_first_member_appearance() {
        let mut first = wpt(Some("Food"));
        first.set_background_type("circle");
        let mut second = wpt(Some("Food"));
        second.set_background_type("square");
        second.set_icon_name("restaurant");
        let prototype = PointsGroup {
            color: Some(0xFF00_FF00),
            ..PointsGroup::new("Food")
        };
        let groups = merge_points_groups(vec![prototype], &[first, second]);
        let food = &groups[0];
        assert_eq!(food.color, Some(0xFF00_FF00));
        assert_eq!(food.background_type.as_deref(), Some("circle"));
        assert_eq!(food.icon_name.as_deref(), Some("restaurant"));
        assert_eq!(food.points, vec![0, 1]);
    }
}
