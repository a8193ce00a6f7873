use super::buffer::TerrainBuffer;
use super::heightfield::Heightfield;
use super::shader::{TerrainShader, TerrainTechnique};
use super::types::TerrainIndex;
use crate::utils::math::{cell_range, AxisBox};
use bitflags::bitflags;
use glam::Vec2;

/// One channel per blended layer
pub const BLEND_MAP_CHANNELS: u32 = 4;

bitflags! {
    /// What has to be rebuilt before the page is handed to the adapter again
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageDirty: u8 {
        const GEOMETRY = 1 << 0;
        const MATERIAL = 1 << 1;
    }
}

/// Compiled material state of a page
#[derive(Debug, Clone, PartialEq)]
pub struct PageMaterial {
    pub technique: TerrainTechnique,
    /// Shader indices blended into the page, one per blend map channel
    pub layers: Vec<usize>,
    pub shadow_revision: u64,
}

/// World units covered by one side of a page with `page_size` vertices
pub fn page_world_size(page_size: u32) -> f32 {
    page_size.saturating_sub(1).max(1) as f32
}

pub fn page_extent(index: TerrainIndex, page_size: u32) -> AxisBox {
    let size = page_world_size(page_size);
    let min = Vec2::new(index.x as f32 * size, index.y as f32 * size);
    AxisBox::new(min, min + Vec2::splat(size))
}

/// Page indices whose extent touches `area`
pub fn pages_covering(area: &AxisBox, page_size: u32) -> impl Iterator<Item = TerrainIndex> {
    let size = page_world_size(page_size);
    let xs = cell_range(area.min.x - size, area.max.x, size);
    let ys = cell_range(area.min.y - size, area.max.y, size);
    let area = *area;
    ys.flat_map(move |y| xs.clone().map(move |x| TerrainIndex::new(x, y)))
        .filter(move |index| page_extent(*index, page_size).intersects(&area))
}

#[derive(Debug)]
pub struct TerrainPage {
    index: TerrainIndex,
    page_size: u32,
    heights: Vec<f32>,
    blend_map: TerrainBuffer<'static>,
    material: Option<PageMaterial>,
    dirty: PageDirty,
}

impl TerrainPage {
    pub(crate) fn new(index: TerrainIndex, page_size: u32) -> Self {
        Self {
            index,
            page_size,
            heights: Vec::new(),
            blend_map: TerrainBuffer::new(page_world_size(page_size) as u32, BLEND_MAP_CHANNELS),
            material: None,
            dirty: PageDirty::all(),
        }
    }

    pub fn index(&self) -> TerrainIndex {
        self.index
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn extent(&self) -> AxisBox {
        page_extent(self.index, self.page_size)
    }

    /// `page_size²` heights, row-major by y
    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    pub fn blend_map(&self) -> &TerrainBuffer<'static> {
        &self.blend_map
    }

    pub fn material(&self) -> Option<&PageMaterial> {
        self.material.as_ref()
    }

    pub fn dirty(&self) -> PageDirty {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self, flags: PageDirty) {
        self.dirty |= flags;
    }

    pub(crate) fn regenerate_geometry(&mut self, heightfield: &Heightfield) {
        let extent = self.extent();
        self.heights = heightfield.blit_heights(
            extent.min.x as i32,
            extent.max.x as i32,
            extent.min.y as i32,
            extent.max.y as i32,
        );
        self.dirty.remove(PageDirty::GEOMETRY);
    }

    /// Rebuild the blend map and material from the current heights and shaders
    pub(crate) fn recompile_material(
        &mut self,
        technique: TerrainTechnique,
        shaders: &[TerrainShader],
        shadow_revision: u64,
        heightfield: &Heightfield,
    ) {
        let blended: Vec<&TerrainShader> = shaders.iter().take(BLEND_MAP_CHANNELS as usize).collect();
        let origin = self.extent().min;
        let width = self.blend_map.width();

        self.blend_map.reset();
        for y in 0..width {
            for x in 0..width {
                let center = origin + Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let height = heightfield.get_height(center).unwrap_or(0.0);
                if let Some(texel) = self.blend_map.texel_mut(x, y) {
                    for (channel, shader) in blended.iter().enumerate() {
                        texel[channel] = shader.layer().coverage(height);
                    }
                }
            }
        }

        self.material = Some(PageMaterial {
            technique,
            layers: blended.iter().map(|s| s.index()).collect(),
            shadow_revision,
        });
        self.dirty.remove(PageDirty::MATERIAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extent_and_covering() {
        assert_eq!(
            page_extent(TerrainIndex::new(1, -1), 65),
            AxisBox::new(Vec2::new(64.0, -64.0), Vec2::new(128.0, 0.0))
        );

        let area = AxisBox::new(Vec2::new(10.0, 10.0), Vec2::new(70.0, 20.0));
        let pages: Vec<_> = pages_covering(&area, 65).collect();
        assert_eq!(pages, vec![TerrainIndex::new(0, 0), TerrainIndex::new(1, 0)]);
    }

    #[test]
    fn test_new_page_is_fully_dirty() {
        let page = TerrainPage::new(TerrainIndex::new(0, 0), 17);
        assert_eq!(page.dirty(), PageDirty::all());
        assert_eq!(page.blend_map().width(), 16);
        assert_eq!(page.blend_map().size(), 16 * 16 * 4);
        assert!(page.material().is_none());
    }

    #[test]
    fn test_regenerate_and_recompile() {
        let mut field = Heightfield::new(16);
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            field.set_base_point(x, y, 2.0);
        }
        let shaders = vec![
            TerrainShader::new(super::super::shader::TerrainLayerDefinition::new(1, "base", "b.png"), 0),
            TerrainShader::new(
                super::super::shader::TerrainLayerDefinition::new(2, "snow", "s.png").with_height_range(10.0, 20.0),
                1,
            ),
        ];

        let mut page = TerrainPage::new(TerrainIndex::new(0, 0), 17);
        page.regenerate_geometry(&field);
        page.recompile_material(TerrainTechnique::Simple, &shaders, 0, &field);

        assert!(page.dirty().is_empty());
        assert_eq!(page.heights().len(), 17 * 17);
        assert!(page.heights().iter().all(|&h| h == 2.0));
        assert_eq!(page.blend_map().texel(3, 3), Some(&[255u8, 0, 0, 0][..]));
        assert_eq!(page.material().unwrap().layers, vec![0, 1]);
    }
}
