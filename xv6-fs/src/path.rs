pub trait Path {
    fn is_absolute(&self) -> bool;

    /// 按 `/` 切分出各个路径项，连续的 `/` 与首尾的 `/` 不产生空项。
    ///
    /// `.` 与 `..` 原样保留，由目录中的同名目录项解析。
    fn components(&self) -> impl DoubleEndedIterator<Item = &Self>;

    fn is_relative(&self) -> bool {
        !self.is_absolute()
    }
}

impl Path for str {
    fn is_absolute(&self) -> bool {
        self.starts_with('/')
    }

    fn components(&self) -> impl DoubleEndedIterator<Item = &Self> {
        self.split('/').filter(|cmp| !cmp.is_empty())
    }
}
